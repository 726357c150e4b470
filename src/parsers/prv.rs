use std::io::{self, BufRead};

/// 프로세스 모델의 태스크 하나: 스레드 수와 실행 노드 (0 기준)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub n_threads: usize,
    pub node: usize,
}

/// 애플리케이션 > 태스크 > 스레드 계층.
///
/// 전역 스레드 번호는 (앱, 태스크, 스레드) 순서로 0부터 매긴다.
/// 트레이스 본문의 앱/태스크/스레드 필드는 1 기준이므로 파싱/출력 시 변환한다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessModel {
    pub apps: Vec<Vec<TaskInfo>>,
}

impl ProcessModel {
    pub fn new() -> Self {
        ProcessModel { apps: Vec::new() }
    }

    pub fn add_application(&mut self) -> usize {
        self.apps.push(Vec::new());
        self.apps.len() - 1
    }

    pub fn add_task(&mut self, app: usize) {
        self.apps[app].push(TaskInfo { n_threads: 0, node: 0 });
    }

    pub fn add_thread(&mut self, app: usize, task: usize, node: usize) {
        let info = &mut self.apps[app][task];
        info.n_threads += 1;
        info.node = node;
    }

    /// (앱, 태스크, 스레드) -> 전역 스레드 번호 (모두 0 기준)
    pub fn global_thread(&self, app: usize, task: usize, thread: usize) -> usize {
        let mut global = 0;
        for (i_app, tasks) in self.apps.iter().enumerate() {
            for (i_task, info) in tasks.iter().enumerate() {
                if i_app == app && i_task == task {
                    return global + thread;
                }
                global += info.n_threads;
            }
        }
        global + thread
    }

    /// 전역 스레드 번호 -> (앱, 태스크, 스레드)
    pub fn thread_location(&self, mut global: usize) -> io::Result<(usize, usize, usize)> {
        for (i_app, tasks) in self.apps.iter().enumerate() {
            for (i_task, info) in tasks.iter().enumerate() {
                if global < info.n_threads {
                    return Ok((i_app, i_task, global));
                }
                global -= info.n_threads;
            }
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Global thread index out of range in process model",
        ))
    }

    /// 태스크가 실행되는 노드 (0 기준)
    pub fn node_of(&self, app: usize, task: usize) -> io::Result<usize> {
        self.apps
            .get(app)
            .and_then(|tasks| tasks.get(task))
            .map(|info| info.node)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Unknown app {app} task {task} in process model"),
                )
            })
    }

    pub fn total_threads(&self) -> usize {
        self.apps
            .iter()
            .map(|tasks| tasks.iter().map(|t| t.n_threads).sum::<usize>())
            .sum()
    }

    // "nTasks(threads:node,...)" 형식 파싱. 노드 번호는 파일에서 1 기준.
    fn parse_app(text: &str) -> io::Result<Vec<TaskInfo>> {
        let open = text.find('(').ok_or_else(|| bad_header(text))?;
        if !text.ends_with(')') {
            return Err(bad_header(text));
        }
        let n_tasks: usize = text[..open].parse().map_err(|_| bad_header(text))?;
        let inner = &text[open + 1..text.len() - 1];

        let mut tasks = Vec::with_capacity(n_tasks);
        for part in inner.split(',') {
            let mut it = part.split(':');
            let n_threads: usize = it
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad_header(text))?;
            let node: usize = it
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| bad_header(text))?;
            if node == 0 {
                return Err(bad_header(text));
            }
            tasks.push(TaskInfo { n_threads, node: node - 1 });
        }

        if tasks.len() != n_tasks {
            return Err(bad_header(text));
        }
        Ok(tasks)
    }

    fn app_to_string(tasks: &[TaskInfo]) -> String {
        let inner: Vec<String> = tasks
            .iter()
            .map(|t| format!("{}:{}", t.n_threads, t.node + 1))
            .collect();
        format!("{}({})", tasks.len(), inner.join(","))
    }
}

/// 노드별 CPU 수
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceModel {
    pub cpus_per_node: Vec<u32>,
}

impl ResourceModel {
    pub fn total_nodes(&self) -> usize {
        self.cpus_per_node.len()
    }

    // "nNodes(cpus1,cpus2,...)" 파싱
    fn parse(text: &str) -> io::Result<ResourceModel> {
        let open = text.find('(').ok_or_else(|| bad_header(text))?;
        if !text.ends_with(')') {
            return Err(bad_header(text));
        }
        let n_nodes: usize = text[..open].parse().map_err(|_| bad_header(text))?;
        let cpus: Result<Vec<u32>, _> = text[open + 1..text.len() - 1]
            .split(',')
            .map(|s| s.parse::<u32>())
            .collect();
        let cpus = cpus.map_err(|_| bad_header(text))?;
        if cpus.len() != n_nodes {
            return Err(bad_header(text));
        }
        Ok(ResourceModel { cpus_per_node: cpus })
    }

    fn to_string(&self) -> String {
        let inner: Vec<String> = self.cpus_per_node.iter().map(|c| c.to_string()).collect();
        format!("{}({})", self.cpus_per_node.len(), inner.join(","))
    }
}

/// prv 트레이스 헤더와 커뮤니케이터 라인들
#[derive(Debug, Clone)]
pub struct TraceHeader {
    pub date: String,
    pub duration: String, // "3000000000_ns" 같은 원문 그대로 보존
    pub resource: ResourceModel,
    pub process: ProcessModel,
    pub communicators: Vec<String>,
}

fn bad_header(text: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Malformed trace header section: '{text}'"),
    )
}

// 괄호 안의 ':' 는 건너뛰고 최상위 ':' 로만 분리
fn split_top_level(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in line.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ':' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

impl TraceHeader {
    /// 첫 줄(헤더)과 이어지는 커뮤니케이터 라인들을 읽는다
    pub fn parse<R: BufRead>(reader: &mut R) -> io::Result<TraceHeader> {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let line = line.trim_end();

        if !line.starts_with("#Paraver ") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Input trace does not start with a #Paraver header",
            ));
        }

        let parts = split_top_level(line);
        if parts.len() < 4 {
            return Err(bad_header(line));
        }

        // "#Paraver (dd/mm/yyyy at hh:mm)" 에서 날짜 부분 추출
        let date = parts[0]
            .find('(')
            .map(|i| parts[0][i + 1..parts[0].len().saturating_sub(1)].to_string())
            .ok_or_else(|| bad_header(line))?;

        let duration = parts[1].clone();
        let resource = ResourceModel::parse(&parts[2])?;
        let n_apps: usize = parts[3].parse().map_err(|_| bad_header(line))?;
        if parts.len() < 4 + n_apps {
            return Err(bad_header(line));
        }

        let mut apps = Vec::with_capacity(n_apps);
        let mut n_comms = 0usize;
        for (i, part) in parts[4..4 + n_apps].iter().enumerate() {
            let mut text = part.as_str();
            if i == n_apps - 1 {
                // 마지막 앱 뒤에 ",nComm" 이 붙을 수 있다
                if let Some(comma) = text.rfind(',') {
                    if comma > text.rfind(')').unwrap_or(0) {
                        n_comms = text[comma + 1..].parse().map_err(|_| bad_header(line))?;
                        text = &text[..comma];
                    }
                }
            }
            apps.push(ProcessModel::parse_app(text)?);
        }

        let mut communicators = Vec::with_capacity(n_comms);
        for _ in 0..n_comms {
            let mut comm_line = String::new();
            reader.read_line(&mut comm_line)?;
            communicators.push(comm_line.trim_end().to_string());
        }

        Ok(TraceHeader {
            date,
            duration,
            resource,
            process: ProcessModel { apps },
            communicators,
        })
    }

    /// 주어진 프로세스 모델로 헤더를 직렬화한다 (출력 트레이스용)
    pub fn to_string_with(&self, process: &ProcessModel) -> String {
        let mut line = format!(
            "#Paraver ({}):{}:{}:{}",
            self.date,
            self.duration,
            self.resource.to_string(),
            process.apps.len()
        );
        for (i, tasks) in process.apps.iter().enumerate() {
            line.push(':');
            line.push_str(&ProcessModel::app_to_string(tasks));
            if i == process.apps.len() - 1 && !self.communicators.is_empty() {
                line.push_str(&format!(",{}", self.communicators.len()));
            }
        }
        line
    }
}

/// 트레이스 본문 레코드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    State,
    Event,
    Comm,
}

/// 파싱된 본문 레코드. 원문 라인은 그대로 통과 출력에 쓰이므로
/// 여기서는 스케줄링에 필요한 필드만 뽑는다.
#[derive(Debug, Clone)]
pub struct RecordLine {
    pub kind: RecordKind,
    pub time: u64,
    pub app: usize,    // 0 기준
    pub task: usize,   // 0 기준
    pub thread: usize, // 0 기준
    pub events: Vec<(u64, i64)>, // EVENT 레코드의 (타입, 값) 쌍들
}

/// 본문 한 줄 파싱. 메타데이터('#')와 빈 줄은 None.
pub fn parse_record_line(line: &str) -> io::Result<Option<RecordLine>> {
    let line = line.trim_end();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(':').collect();
    let bad = |what: &str| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Malformed trace record ({what}): '{line}'"),
        )
    };

    let kind = match fields[0] {
        "1" => RecordKind::State,
        "2" => RecordKind::Event,
        "3" => RecordKind::Comm,
        _ => return Err(bad("unknown record type")),
    };

    if fields.len() < 6 {
        return Err(bad("too few fields"));
    }

    let parse_idx = |i: usize, what: &str| -> io::Result<u64> {
        fields[i].parse::<u64>().map_err(|_| bad(what))
    };

    let app = parse_idx(2, "application")? as usize;
    let task = parse_idx(3, "task")? as usize;
    let thread = parse_idx(4, "thread")? as usize;
    if app == 0 || task == 0 || thread == 0 {
        return Err(bad("object ids are 1-based"));
    }

    // state/comm 은 시작(논리 송신) 시각, event 는 발생 시각이 6번째 필드
    let time = parse_idx(5, "timestamp")?;

    let mut events = Vec::new();
    if kind == RecordKind::Event {
        if fields.len() < 8 || (fields.len() - 6) % 2 != 0 {
            return Err(bad("event pairs"));
        }
        for pair in fields[6..].chunks(2) {
            let event_type = pair[0].parse::<u64>().map_err(|_| bad("event type"))?;
            let value = pair[1].parse::<i64>().map_err(|_| bad("event value"))?;
            events.push((event_type, value));
        }
    }

    Ok(Some(RecordLine {
        kind,
        time,
        app: app - 1,
        task: task - 1,
        thread: thread - 1,
        events,
    }))
}
