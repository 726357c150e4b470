use crate::processors::NodeMemoryRecords;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// row 라벨 파일. "LEVEL <이름> SIZE <n>" 섹션과 라벨 n 줄의 반복이다.
#[derive(Debug, Clone, Default)]
pub struct RowFile {
    pub levels: Vec<(String, Vec<String>)>,
}

impl RowFile {
    pub fn new() -> Self {
        RowFile::default()
    }

    pub fn parse(path: &Path) -> io::Result<RowFile> {
        let file = File::open(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("row file not found: '{}' ({e})", path.display()),
            )
        })?;

        let mut levels: Vec<(String, Vec<String>)> = Vec::new();
        let mut remaining = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if remaining > 0 {
                if let Some((_, labels)) = levels.last_mut() {
                    labels.push(line);
                }
                remaining -= 1;
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.len() >= 4 && tokens[0] == "LEVEL" && tokens[tokens.len() - 2] == "SIZE" {
                let name = tokens[1..tokens.len() - 2].join(" ");
                remaining = tokens[tokens.len() - 1].parse().map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Malformed row section header: '{trimmed}'"),
                    )
                })?;
                levels.push((name, Vec::with_capacity(remaining)));
            }
        }

        Ok(RowFile { levels })
    }

    pub fn labels(&self, level: &str) -> Option<&Vec<String>> {
        self.levels
            .iter()
            .find(|(name, _)| name == level)
            .map(|(_, labels)| labels)
    }

    /// 노드 라벨 목록. NODE 섹션이 없거나 모자라면 합성 이름으로 채운다.
    pub fn node_names(&self, n_nodes: usize) -> Vec<String> {
        let mut names: Vec<String> = self
            .labels("NODE")
            .map(|labels| labels.iter().take(n_nodes).cloned().collect())
            .unwrap_or_default();
        while names.len() < n_nodes {
            names.push(format!("node{}", names.len()));
        }
        names
    }

    pub fn push(&mut self, level: &str, label: String) {
        if let Some((_, labels)) = self.levels.iter_mut().find(|(name, _)| name == level) {
            labels.push(label);
        } else {
            self.levels.push((level.to_string(), vec![label]));
        }
    }

    pub fn dump_to_file(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for (name, labels) in &self.levels {
            writeln!(writer, "LEVEL {name} SIZE {}", labels.len())?;
            for label in labels {
                writeln!(writer, "{label}")?;
            }
            writeln!(writer)?;
        }
        writer.flush()
    }
}

/// 출력 row 파일 작성: 원본 첫 번째 앱의 라벨을 복사한 뒤,
/// 노드/소켓/컨트롤러 합성 계층 라벨을 덧붙인다.
pub fn write_output_row(
    in_row: &RowFile,
    out_path: &Path,
    app0_tasks: usize,
    app0_threads: usize,
    nodes: &[NodeMemoryRecords],
    per_socket: bool,
) -> io::Result<()> {
    let mut out = RowFile::new();

    // 원본 앱 0 라벨 복사 (라벨이 모자라면 기본 이름)
    let appl_label = in_row
        .labels("APPL")
        .and_then(|l| l.first().cloned())
        .unwrap_or_else(|| "APPL 1".to_string());
    out.push("APPL", appl_label);

    for i_task in 0..app0_tasks {
        let label = in_row
            .labels("TASK")
            .and_then(|l| l.get(i_task).cloned())
            .unwrap_or_else(|| format!("TASK 1.{}", i_task + 1));
        out.push("TASK", label);
    }
    for i_thread in 0..app0_threads {
        let label = in_row
            .labels("THREAD")
            .and_then(|l| l.get(i_thread).cloned())
            .unwrap_or_else(|| format!("THREAD 1.1.{}", i_thread + 1));
        out.push("THREAD", label);
    }

    // 합성 계층: 앱 = 노드, 태스크 = 소켓, 스레드 = 소켓 또는 컨트롤러
    for node in nodes {
        out.push("APPL", node.name.clone());
        for (socket_id, socket) in &node.sockets {
            let socket_label = format!("{}.Skt{}", node.name, socket_id);
            out.push("TASK", socket_label.clone());
            if per_socket {
                out.push("THREAD", socket_label);
            } else {
                for i_mc in 0..socket.controller_ids.len() {
                    out.push("THREAD", format!("{socket_label}.MC{i_mc}"));
                }
            }
        }
    }

    out.dump_to_file(out_path)
}
