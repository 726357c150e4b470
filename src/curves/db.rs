use serde::Deserialize;
use std::io;
use std::path::Path;

/// cpu_memory_db.csv 의 한 행.
/// CPU 모델과 메모리 시스템 조합마다 PMU 타입과 마이크로아키텍처를 보관한다.
#[derive(Deserialize, Debug, Clone)]
pub struct CpuMemoryEntry {
    pub pmu_type: String,
    pub cpu_microarchitecture: String,
    pub cpu_model: String,
    pub memory_system: String,
}

/// 지원되는 CPU/메모리 시스템 조합 데이터베이스
pub struct CpuMemoryDb {
    entries: Vec<CpuMemoryEntry>,
}

impl CpuMemoryDb {
    pub fn load(data_path: &Path) -> io::Result<CpuMemoryDb> {
        let db_path = data_path.join("cpu_memory_db.csv");
        if !db_path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("cpu_memory_db.csv not found in '{}'", data_path.display()),
            ));
        }

        let mut reader = csv::Reader::from_path(&db_path).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Cannot read '{}': {e}", db_path.display()),
            )
        })?;

        let mut entries = Vec::new();
        for row in reader.deserialize() {
            let entry: CpuMemoryEntry = row.map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Malformed row in '{}': {e}", db_path.display()),
                )
            })?;
            entries.push(entry);
        }

        Ok(CpuMemoryDb { entries })
    }

    /// 주어진 CPU 모델 + 메모리 시스템에 해당하는 행 조회.
    /// 조합이 없거나 두 개 이상이면 설정 오류로 실패한다.
    pub fn find(&self, cpu_model: &str, memory_system: &str) -> io::Result<&CpuMemoryEntry> {
        if !self.entries.iter().any(|e| e.cpu_model == cpu_model) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "Unknown CPU model '{cpu_model}'. \
                     Check the supported systems with the --supported-systems flag"
                ),
            ));
        }
        if !self.entries.iter().any(|e| e.memory_system == memory_system) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "Unknown memory system '{memory_system}'. \
                     Check the supported systems with the --supported-systems flag"
                ),
            ));
        }

        let matches: Vec<&CpuMemoryEntry> = self
            .entries
            .iter()
            .filter(|e| e.cpu_model == cpu_model && e.memory_system == memory_system)
            .collect();

        match matches.len() {
            0 => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "No performance curves for CPU '{cpu_model}' with memory system '{memory_system}'"
                ),
            )),
            1 => Ok(matches[0]),
            n => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{n} database entries match CPU '{cpu_model}' with memory system '{memory_system}'"
                ),
            )),
        }
    }

    /// 지원되는 시스템 목록 출력 (--supported-systems)
    pub fn print_supported_systems(&self) {
        println!("CPU - DRAM");
        println!("-----------------");
        for e in &self.entries {
            println!(
                "{} {} {} - {}",
                e.pmu_type, e.cpu_microarchitecture, e.cpu_model, e.memory_system
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_db(dir: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let mut f = fs::File::create(format!("{dir}/cpu_memory_db.csv")).unwrap();
        writeln!(f, "pmu_type,cpu_microarchitecture,cpu_model,memory_system").unwrap();
        writeln!(f, "intel,skylake,Xeon Platinum 8160,DDR4-2666").unwrap();
        writeln!(f, "kunpeng,tsv110,Kunpeng 920,DDR4-2933").unwrap();
        PathBuf::from(dir)
    }

    #[test]
    fn test_db_lookup() {
        let dir = write_db("test_db_temp");
        let db = CpuMemoryDb::load(&dir).unwrap();

        let entry = db.find("Xeon Platinum 8160", "DDR4-2666").unwrap();
        assert_eq!(entry.pmu_type, "intel");
        assert_eq!(entry.cpu_microarchitecture, "skylake");

        // 지원하지 않는 조합은 조회 단계에서 실패해야 한다
        assert!(db.find("Xeon Platinum 8160", "DDR4-2933").is_err());
        assert!(db.find("EPYC 7742", "DDR4-2666").is_err());

        fs::remove_dir_all("test_db_temp").ok();
    }
}
