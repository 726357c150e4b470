use crate::log_warn;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// 단일 읽기 비율에 대한 대역폭-지연시간 곡선.
///
/// bwlat_<read_ratio>.txt 파일은 "대역폭(MB/s) 지연시간(cycle)" 쌍을
/// 대역폭 내림차순으로 담고 있으므로 역순으로 읽어 오름차순 배열을 만든다.
pub struct Curve {
    pub read_ratio: u32,
    bws: Vec<f64>,  // MB/s, 오름차순
    lats: Vec<f64>, // CPU cycle 단위
}

impl Curve {
    pub fn load(curves_path: &Path, read_ratio: u32) -> io::Result<Curve> {
        let filename = curves_path.join(format!("bwlat_{read_ratio}.txt"));
        let file = File::open(&filename).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Cannot open curve file '{}': {e}", filename.display()),
            )
        })?;

        let mut bws = Vec::new();
        let mut lats = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 || tokens[0].starts_with('#') {
                continue;
            }
            let bw: f64 = tokens[0].parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Bad bandwidth value '{}' in '{}'", tokens[0], filename.display()),
                )
            })?;
            let lat: f64 = tokens[1].parse().map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Bad latency value '{}' in '{}'", tokens[1], filename.display()),
                )
            })?;
            bws.push(bw);
            lats.push(lat);
        }

        if bws.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Curve file '{}' has no samples", filename.display()),
            ));
        }

        // 파일은 대역폭 내림차순이므로 뒤집는다
        bws.reverse();
        lats.reverse();

        Ok(Curve { read_ratio, bws, lats })
    }

    /// 측정 배열로부터 직접 곡선 구성 (테스트와 스텁 용도)
    pub fn from_samples(read_ratio: u32, bws: Vec<f64>, lats: Vec<f64>) -> Curve {
        Curve { read_ratio, bws, lats }
    }

    /// 주어진 대역폭(GB/s)에 대한 예상 지연시간(cycle)을 선형 보간으로 구한다.
    ///
    /// 곡선의 최소 대역폭보다 작으면 해당 구간이 사실상 평탄하므로 첫 지연시간을
    /// 그대로 반환하고, 최대 대역폭을 넘어서면 -1을 반환한다 (초과 구간은
    /// 지수적으로 증가해 신뢰할 만한 추정이 불가능하다).
    pub fn get_lat(&self, bw_gbps: f64) -> f64 {
        if bw_gbps == 0.0 {
            // 대역폭 0이면 지연시간은 정의되지 않음
            return -1.0;
        }

        // 곡선은 MB/s 단위
        let bw = bw_gbps * 1000.0;
        let i = self.bws.partition_point(|&b| b < bw);
        if i == 0 {
            return self.lats[0];
        }
        if i >= self.bws.len() {
            log_warn!(
                "Cannot estimate latency for bandwidth {:.2} GB/s using the curve for a write ratio of {}%: \
                 bandwidth larger than the largest recorded one",
                bw_gbps,
                100 - self.read_ratio
            );
            return -1.0;
        }

        // (i-1, i) 구간에서 선형 보간
        let (x1, y1) = (self.bws[i - 1], self.lats[i - 1]);
        let (x2, y2) = (self.bws[i], self.lats[i]);
        y1 + (bw - x1) / (x2 - x1) * (y2 - y1)
    }

    /// 곡선의 최대 대역폭 (GB/s)
    pub fn max_bw_gbps(&self) -> f64 {
        self.bws.iter().cloned().fold(f64::MIN, f64::max) / 1000.0
    }

    /// 곡선의 최대 지연시간 (cycle)
    pub fn max_lat(&self) -> f64 {
        self.lats.iter().cloned().fold(f64::MIN, f64::max)
    }

    /// 부하가 거의 없을 때의 지연시간 (최소 대역폭 지점의 값, cycle)
    pub fn lead_off_lat(&self) -> f64 {
        let mut min_idx = 0;
        for (i, &bw) in self.bws.iter().enumerate() {
            if bw < self.bws[min_idx] {
                min_idx = i;
            }
        }
        self.lats[min_idx]
    }

    /// 스트레스 점수 (0: 여유, 1: 모델 한계).
    ///
    /// 현재 동작점에서의 곡선 기울기 각도 점수와, lead-off 대비 지연시간
    /// 위치 점수의 평균. 대역폭이 곡선 범위를 벗어나면 None.
    pub fn stress_score(&self, bw_gbps: f64, lat: f64) -> Option<f64> {
        if self.bws.len() < 2 {
            return None;
        }
        let bw = bw_gbps * 1000.0;
        let idx = self.bws.partition_point(|&b| b < bw);
        if idx >= self.bws.len() {
            return None;
        }
        let idx = idx.max(1);

        let (x_prev, y_prev) = (self.bws[idx - 1], self.lats[idx - 1]);
        let (x_post, y_post) = (self.bws[idx], self.lats[idx]);

        let angle = (y_post - y_prev).atan2(x_post - x_prev).to_degrees();
        let score_angle = angle / 90.0;
        let score_latency = (lat - self.lead_off_lat()) / (self.max_lat() - self.lead_off_lat());
        Some((score_angle + score_latency) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_curve() -> Curve {
        // 오름차순 대역폭 (MB/s), 지연시간 (cycle)
        Curve::from_samples(
            100,
            vec![1000.0, 2000.0, 4000.0, 8000.0],
            vec![100.0, 120.0, 180.0, 400.0],
        )
    }

    #[test]
    fn test_lat_interpolation_midpoint() {
        let curve = sample_curve();
        // 3 GB/s = 3000 MB/s 는 2000~4000 구간의 중점 -> 150 cycle
        assert!((curve.get_lat(3.0) - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_lat_below_range_returns_first() {
        let curve = sample_curve();
        assert_eq!(curve.get_lat(0.5), 100.0);
    }

    #[test]
    fn test_lat_overshoot_returns_sentinel() {
        let curve = sample_curve();
        assert_eq!(curve.get_lat(9.0), -1.0);
    }

    #[test]
    fn test_lat_zero_bandwidth() {
        let curve = sample_curve();
        assert_eq!(curve.get_lat(0.0), -1.0);
    }

    #[test]
    fn test_envelope_figures() {
        let curve = sample_curve();
        assert!((curve.max_bw_gbps() - 8.0).abs() < 1e-9);
        assert_eq!(curve.max_lat(), 400.0);
        assert_eq!(curve.lead_off_lat(), 100.0);
    }

    #[test]
    fn test_stress_score_bounds() {
        let curve = sample_curve();
        let lat = curve.get_lat(7.9);
        let near_max = curve.stress_score(7.9, lat).unwrap();
        let lat = curve.get_lat(1.1);
        let near_idle = curve.stress_score(1.1, lat).unwrap();
        assert!(near_max > near_idle);
        // 범위를 벗어나면 점수 없음
        assert!(curve.stress_score(9.0, 400.0).is_none());
    }
}
