use serde::Serialize;

/// 하나의 누적 구간 [t0, t1) 동안 관측된 메모리 접근 수
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRecord {
    pub t0: u64, // 구간 시작 (ns)
    pub t1: u64, // 구간 끝 (ns)
    pub n: u64,  // t0~t1 사이의 캐시라인 단위 접근 횟수
}

impl MemoryRecord {
    pub fn new(t0: u64, t1: u64, n: u64) -> Self {
        MemoryRecord { t0, t1, n }
    }
}
