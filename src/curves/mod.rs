pub mod curve;
pub mod db;

pub use curve::Curve;
pub use db::{CpuMemoryDb, CpuMemoryEntry};

use crate::log_warn;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// 곡선 조회 결과. 위치 기반 튜플 대신 이름 있는 필드를 사용한다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveMetrics {
    pub max_bandwidth: f64,    // GB/s (소켓 단위)
    pub latency: f64,          // ns, -1 = 추정 불가
    pub lead_off_latency: f64, // ns
    pub max_latency: f64,      // ns
    pub stress_score: f64,     // 0~1
    pub bandwidth: f64,        // GB/s, 한계 초과 시 보정된 값
}

/// 곡선 조회 서비스 인터페이스.
///
/// 집계기는 이 트레이트를 통해서만 성능 모델에 접근하므로 테스트에서는
/// 고정 값을 돌려주는 스텁으로 대체할 수 있다.
pub trait CurveLookup {
    fn compute_memory_metrics(
        &self,
        cpu_freq_ghz: f64,
        write_ratio: f64,
        bandwidth: f64,
        group_controllers: bool,
        controllers_in_socket: usize,
    ) -> io::Result<CurveMetrics>;
}

/// CPU/메모리 시스템 조합 하나에 대한 곡선 집합.
/// <data>/bw_lat_curves/<memory_system>__<pmu>__<uarch>__<cpu>/ 에서
/// bwlat_<read_ratio>.txt 파일을 전부 읽어 시작 시 한 번 메모리에 올린다.
pub struct Curves {
    curves: BTreeMap<u32, Curve>,
    read_ratios: Vec<u32>,
}

impl Curves {
    pub fn load(
        data_path: &Path,
        entry: &CpuMemoryEntry,
    ) -> io::Result<Curves> {
        let dir = Self::curves_dir(data_path, entry);
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Curve directory '{}' not found", dir.display()),
            ));
        }

        let mut curves = BTreeMap::new();
        for dirent in std::fs::read_dir(&dir)? {
            let path = dirent?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(ratio_str) = name
                .strip_prefix("bwlat_")
                .and_then(|rest| rest.strip_suffix(".txt"))
            {
                let ratio: u32 = ratio_str.parse().map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Bad read ratio in curve file name '{name}'"),
                    )
                })?;
                curves.insert(ratio, Curve::load(&dir, ratio)?);
            }
        }

        if curves.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("No bwlat_*.txt curve files in '{}'", dir.display()),
            ));
        }

        let read_ratios = curves.keys().cloned().collect();
        Ok(Curves { curves, read_ratios })
    }

    pub fn curves_dir(data_path: &Path, entry: &CpuMemoryEntry) -> PathBuf {
        data_path.join("bw_lat_curves").join(format!(
            "{}__{}__{}__{}",
            entry.memory_system, entry.pmu_type, entry.cpu_microarchitecture, entry.cpu_model
        ))
    }

    /// 테스트용: 미리 구성된 곡선들로 집합 생성
    pub fn from_curves(list: Vec<Curve>) -> Curves {
        let mut curves = BTreeMap::new();
        for c in list {
            curves.insert(c.read_ratio, c);
        }
        let read_ratios = curves.keys().cloned().collect();
        Curves { curves, read_ratios }
    }

    /// 요청한 읽기 비율에 가장 가까운 곡선 선택.
    /// 계산된 곡선이 모든 비율을 갖고 있지는 않다.
    pub fn nearest(&self, read_ratio_pct: f64) -> &Curve {
        let mut best = self.read_ratios[0];
        for &r in &self.read_ratios {
            if (r as f64 - read_ratio_pct).abs() < (best as f64 - read_ratio_pct).abs() {
                best = r;
            }
        }

        if (best as f64 - read_ratio_pct).abs() > 2.0 {
            log_warn!(
                "The given write ratio of {:.1}% may be too far from the ones computed in the curves. \
                 Using closest write ratio of {}%",
                100.0 - read_ratio_pct,
                100 - best
            );
        }

        &self.curves[&best]
    }
}

impl CurveLookup for Curves {
    fn compute_memory_metrics(
        &self,
        cpu_freq_ghz: f64,
        write_ratio: f64,
        bandwidth: f64,
        group_controllers: bool,
        controllers_in_socket: usize,
    ) -> io::Result<CurveMetrics> {
        if write_ratio < 0.0 || bandwidth < 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Write ratio and bandwidth cannot be negative \
                     (write_ratio={write_ratio}, bandwidth={bandwidth})"
                ),
            ));
        }

        let curve = self.nearest((1.0 - write_ratio) * 100.0);

        // 곡선은 소켓 단위로 측정된 것이므로, 컨트롤러 단위 대역폭은
        // 소켓의 컨트롤러 수만큼 확장해 조회한 뒤 결과를 다시 나눈다
        let mc_count = controllers_in_socket.max(1) as f64;
        let mut socket_bw = if group_controllers {
            bandwidth * mc_count
        } else {
            bandwidth
        };

        let max_bw = curve.max_bw_gbps();
        let mut out_bw = bandwidth;
        let mut stress_score = -1.0;

        if socket_bw > max_bw {
            // 모델 한계를 넘는 대역폭은 한계값으로 보정
            socket_bw = max_bw;
            out_bw = if group_controllers { max_bw / mc_count } else { max_bw };
            stress_score = 1.0;
        }

        let lat = curve.get_lat(socket_bw);
        if stress_score < 0.0 {
            stress_score = curve.stress_score(socket_bw, lat).unwrap_or(1.0);
        }

        Ok(CurveMetrics {
            max_bandwidth: max_bw,
            latency: if lat < 0.0 { -1.0 } else { lat / cpu_freq_ghz },
            lead_off_latency: curve.lead_off_lat() / cpu_freq_ghz,
            max_latency: curve.max_lat() / cpu_freq_ghz,
            stress_score,
            bandwidth: out_bw,
        })
    }
}
