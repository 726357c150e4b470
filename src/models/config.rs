use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

/// JSON 설정 파일 내용
///
/// ```json
/// {
///   "memory_system": "DDR4-2666",
///   "cpu_model": "Xeon Platinum 8160",
///   "cpu_freq_ghz": 2.1,
///   "cache_line_bytes": 64
/// }
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    pub memory_system: String,
    pub cpu_model: String,
    pub cpu_freq_ghz: f64,
    pub cache_line_bytes: u32,
    // 곡선 데이터 디렉토리. 생략하면 실행 파일 기준 ../data, 그것도 없으면 ./data
    pub data_path: Option<String>,
}

impl RunConfig {
    pub fn from_file(path: &str) -> io::Result<RunConfig> {
        let file = File::open(path).map_err(|e| {
            io::Error::new(e.kind(), format!("Cannot open config file '{path}': {e}"))
        })?;
        let config: RunConfig = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Malformed config file '{path}': {e}"),
            )
        })?;

        if config.cpu_freq_ghz <= 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "cpu_freq_ghz must be positive, {} was given",
                    config.cpu_freq_ghz
                ),
            ));
        }
        if config.cache_line_bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "cache_line_bytes must be positive",
            ));
        }

        Ok(config)
    }

    /// 곡선 데이터 디렉토리 결정
    pub fn resolve_data_path(&self) -> PathBuf {
        if let Some(ref p) = self.data_path {
            return PathBuf::from(p);
        }

        // 실행 파일 위치 기준으로 ../data 탐색 (bin/ 아래 설치된 경우)
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let candidate = dir.join("../data");
                if candidate.is_dir() {
                    return candidate;
                }
            }
        }

        PathBuf::from("data")
    }
}
