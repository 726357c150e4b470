// PMU 벤더 구분. cpu_memory_db.csv 의 pmu_type 컬럼 값과 일치해야 한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuType {
    Intel,
    Kunpeng,
    // 새 PMU 벤더 지원 시 여기에 추가
}

use std::str::FromStr;

impl FromStr for PmuType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "intel" => Ok(PmuType::Intel),
            "kunpeng" => Ok(PmuType::Kunpeng),
            // 여기에 새 벤더 매칭 추가
            _ => Err(format!("Unknown PMU type: {s}")),
        }
    }
}

impl PmuType {
    pub fn display_name(&self) -> &'static str {
        match self {
            PmuType::Intel => "Intel",
            PmuType::Kunpeng => "Kunpeng",
        }
    }
}
