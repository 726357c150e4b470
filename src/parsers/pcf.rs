use crate::models::{Direction, MemoryEvent, PmuType};
use crate::utils::constants::{BASE_EVENT_TYPE, METRIC_PRECISION};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

lazy_static! {
    // Intel: uncore IMC CAS 카운터
    static ref INTEL_MC_RE: Regex = Regex::new(r"unc_imc(\d+)::UNC_M_CAS_COUNT").unwrap();
    static ref INTEL_CPU_RE: Regex = Regex::new(r"UNC_M_CAS_COUNT.*:cpu=(\d+)").unwrap();
    static ref INTEL_READ_RE: Regex = Regex::new(r"^\d+\s+(\d+).*UNC_M_CAS_COUNT:RD:").unwrap();
    static ref INTEL_WRITE_RE: Regex = Regex::new(r"^\d+\s+(\d+).*UNC_M_CAS_COUNT:WR:").unwrap();

    // Kunpeng: SCCL 별 DDRC flux 카운터
    static ref KUNPENG_MC_RE: Regex = Regex::new(r"_ddrc(\d+)").unwrap();
    static ref KUNPENG_SCCL_RE: Regex = Regex::new(r"hisi_sccl(\d+)").unwrap();
    static ref KUNPENG_READ_RE: Regex = Regex::new(r"^\d+\s+(\d+).*hisi_sccl.*::flux_rd:").unwrap();
    static ref KUNPENG_WRITE_RE: Regex = Regex::new(r"^\d+\s+(\d+).*hisi_sccl.*::flux_wr:").unwrap();
}

/// pcf 이벤트 타입 테이블에서 메모리 카운터 이벤트의
/// (소켓, 컨트롤러, 방향) 대응표를 추출한다.
///
/// 벤더별 차이는 PmuType 에 대한 match 하나로 처리한다. 추출 결과가 비어
/// 있으면 이 트레이스로는 아무것도 계산할 수 없으므로 실패한다.
pub fn extract_memory_event_types(
    pcf_path: &Path,
    pmu_type: PmuType,
) -> io::Result<BTreeMap<u64, MemoryEvent>> {
    let file = File::open(pcf_path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("pcf file not found: '{}' ({e})", pcf_path.display()),
        )
    })?;

    let mut mem_events = BTreeMap::new();
    // Intel 은 cpu= 값이 처음 나타난 순서가 소켓 번호가 된다
    let mut unique_cpus: Vec<u32> = Vec::new();

    for line in BufReader::new(file).lines() {
        let line = line?;
        match pmu_type {
            PmuType::Intel => {
                parse_intel_line(&line, &mut unique_cpus, &mut mem_events)?;
            }
            PmuType::Kunpeng => {
                parse_kunpeng_line(&line, &mut mem_events)?;
            }
        }
    }

    if mem_events.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "No {} memory counter event types found in pcf file '{}'",
                pmu_type.display_name(),
                pcf_path.display()
            ),
        ));
    }

    Ok(mem_events)
}

fn parse_intel_line(
    line: &str,
    unique_cpus: &mut Vec<u32>,
    mem_events: &mut BTreeMap<u64, MemoryEvent>,
) -> io::Result<()> {
    let Some(cpu_match) = INTEL_CPU_RE.captures(line) else {
        return Ok(());
    };
    let cpu: u32 = cpu_match[1].parse().unwrap_or(0);
    if !unique_cpus.contains(&cpu) {
        unique_cpus.push(cpu);
    }
    let socket = unique_cpus.iter().position(|&c| c == cpu).unwrap_or(0) as u32;

    let controller: u32 = match INTEL_MC_RE.captures(line) {
        Some(m) => m[1].parse().unwrap_or(0),
        None => 0,
    };

    let (event_type, direction) = if let Some(m) = INTEL_READ_RE.captures(line) {
        (m[1].parse::<u64>().unwrap_or(0), Direction::Read)
    } else if let Some(m) = INTEL_WRITE_RE.captures(line) {
        (m[1].parse::<u64>().unwrap_or(0), Direction::Write)
    } else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unrecognized memory event line: '{line}'"),
        ));
    };

    mem_events.insert(event_type, MemoryEvent { socket, controller, direction });
    Ok(())
}

fn parse_kunpeng_line(
    line: &str,
    mem_events: &mut BTreeMap<u64, MemoryEvent>,
) -> io::Result<()> {
    let Some(sccl_match) = KUNPENG_SCCL_RE.captures(line) else {
        return Ok(());
    };
    let sccl: u32 = sccl_match[1].parse().unwrap_or(0);

    // SCCL 1/3 -> 소켓 0, 5/7 -> 소켓 1. 두 번째 SCCL 의 DDRC 는 4부터 이어진다.
    let socket = match sccl {
        1 | 3 => 0,
        5 | 7 => 1,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown SCCL {sccl}, check the pcf file"),
            ))
        }
    };

    let mut controller: u32 = match KUNPENG_MC_RE.captures(line) {
        Some(m) => m[1].parse().unwrap_or(0),
        None => 0,
    };
    if sccl == 3 || sccl == 7 {
        controller += 4;
    }

    let (event_type, direction) = if let Some(m) = KUNPENG_READ_RE.captures(line) {
        (m[1].parse::<u64>().unwrap_or(0), Direction::Read)
    } else if let Some(m) = KUNPENG_WRITE_RE.captures(line) {
        (m[1].parse::<u64>().unwrap_or(0), Direction::Write)
    } else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unrecognized memory event line: '{line}'"),
        ));
    };

    mem_events.insert(event_type, MemoryEvent { socket, controller, direction });
    Ok(())
}

/// 출력 pcf 파일 작성.
///
/// keep_original 이면 원본 pcf 의 내용을 복사하되, 메모리 카운터 이벤트
/// 타입 정의는 제외한다 (해당 레코드는 출력 트레이스에서 소비되어 사라지므로).
/// 마지막에 합성 메트릭 이벤트 타입 블록을 덧붙인다.
pub fn write_output_pcf(
    in_pcf: &Path,
    out_pcf: &Path,
    mem_event_types: &BTreeMap<u64, MemoryEvent>,
    metric_labels: &[&str],
    keep_original: bool,
) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(out_pcf)?);

    if keep_original && in_pcf.is_file() {
        let content = std::fs::read_to_string(in_pcf)?;
        for block in split_blocks(&content) {
            if let Some(filtered) = filter_event_type_block(&block, mem_event_types) {
                writeln!(writer, "{filtered}")?;
                writeln!(writer)?;
            }
        }
    }

    writeln!(writer, "EVENT_TYPE")?;
    for (i, label) in metric_labels.iter().enumerate() {
        writeln!(writer, "0    {}    {label}", BASE_EVENT_TYPE + 1 + i as u64)?;
    }
    writeln!(writer, "PRECISION")?;
    writeln!(writer, "{METRIC_PRECISION}")?;

    writer.flush()
}

// 빈 줄 기준으로 pcf 를 블록 단위로 나눈다
fn split_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

// EVENT_TYPE 블록에서 메모리 카운터 타입 라인을 제거한다.
// 타입 라인이 모두 제거되면 블록 전체(VALUES 포함)를 버린다.
fn filter_event_type_block(
    block: &str,
    mem_event_types: &BTreeMap<u64, MemoryEvent>,
) -> Option<String> {
    let mut lines = block.lines();
    let first = lines.next()?;
    if first.trim() != "EVENT_TYPE" {
        return Some(block.to_string());
    }

    let mut kept = vec![first.to_string()];
    let mut kept_types = 0usize;
    let mut in_values = false;
    for line in lines {
        let trimmed = line.trim();
        if trimmed == "VALUES" {
            in_values = true;
            kept.push(line.to_string());
            continue;
        }
        if !in_values {
            // "gradient  type  label" 형식
            let mut it = trimmed.split_whitespace();
            let _gradient = it.next();
            if let Some(type_str) = it.next() {
                if let Ok(event_type) = type_str.parse::<u64>() {
                    if mem_event_types.contains_key(&event_type) {
                        continue;
                    }
                    kept_types += 1;
                }
            }
        }
        kept.push(line.to_string());
    }

    if kept_types == 0 {
        return None;
    }
    Some(kept.join("\n"))
}
