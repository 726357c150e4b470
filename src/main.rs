use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::time::Instant;

use memtrace::curves::{CpuMemoryDb, Curves};
use memtrace::models::{PmuType, RunConfig, METRIC_LABELS};
use memtrace::output::{print_final_summary, save_metrics_to_csv};
use memtrace::parsers::{
    extract_memory_event_types, write_output_pcf, write_output_row, RowFile, TraceHeader,
};
use memtrace::processors::{
    build_output_process_model, controllers_per_socket, run_scheduler, NodeMemoryRecords,
    SchedulerOptions,
};
use memtrace::utils::{set_display_text, set_display_warnings, Logger};
use memtrace::{log, log_error};

fn print_usage(program: &str) {
    eprintln!("Usage:");
    eprintln!("  {program} [options] <input_trace.prv> <output_trace.prv> <config.json>");
    eprintln!("\nOptions:");
    eprintln!("  -s, --socket             - Compute memory stress metrics per socket instead of per memory controller");
    eprintln!("  -n, --no-original        - Do not copy the original trace content into the output");
    eprintln!("  -w, --no-warnings        - Do not show warning messages");
    eprintln!("  -t, --no-text            - Do not show info text messages");
    eprintln!("      --csv                - Export the computed metrics to a CSV file next to the output trace");
    eprintln!("      --supported-systems  - Print the supported CPU/memory system combinations and exit");
    eprintln!("  -h, --help               - Show this help");
    // 새 옵션이 추가되면 여기에 업데이트
}

struct CliArgs {
    input: String,
    output: String,
    config: String,
    per_socket: bool,
    keep_original: bool,
    export_csv: bool,
    supported_systems: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut positional: Vec<&String> = Vec::new();
    let mut per_socket = false;
    let mut keep_original = true;
    let mut export_csv = false;
    let mut supported_systems = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-s" | "--socket" => per_socket = true,
            "-n" | "--no-original" => keep_original = false,
            "-w" | "--no-warnings" => set_display_warnings(false),
            "-t" | "--no-text" => set_display_text(false),
            "--csv" => export_csv = true,
            "--supported-systems" => supported_systems = true,
            "-h" | "--help" => return Err(String::new()),
            other if other.starts_with('-') => {
                return Err(format!("Unknown option: {other}"));
            }
            _ => positional.push(&args[i]),
        }
        i += 1;
    }

    if supported_systems {
        // config 파일만 있으면 된다
        if positional.len() != 1 {
            return Err("--supported-systems requires only the <config.json> argument".to_string());
        }
        return Ok(CliArgs {
            input: String::new(),
            output: String::new(),
            config: positional[0].clone(),
            per_socket,
            keep_original,
            export_csv,
            supported_systems,
        });
    }

    if positional.len() != 3 {
        return Err("Expected exactly 3 arguments: <input_trace.prv> <output_trace.prv> <config.json>".to_string());
    }

    Ok(CliArgs {
        input: positional[0].clone(),
        output: positional[1].clone(),
        config: positional[2].clone(),
        per_socket,
        keep_original,
        export_csv,
        supported_systems,
    })
}

// 입력 prv 경로에서 짝이 되는 .pcf/.row 경로 유도
fn companion_path(prv_path: &str, extension: &str) -> PathBuf {
    let path = Path::new(prv_path);
    path.with_extension(extension)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("Error: {message}");
            }
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    if let Err(e) = run(&cli) {
        log_error!("{e}");
        let _ = Logger::flush();
        process::exit(1);
    }
}

fn run(cli: &CliArgs) -> io::Result<()> {
    // 설정 파일과 곡선 데이터베이스는 어떤 출력도 쓰기 전에 검증한다
    let config = RunConfig::from_file(&cli.config)?;
    let data_path = config.resolve_data_path();
    let db = CpuMemoryDb::load(&data_path)?;

    if cli.supported_systems {
        db.print_supported_systems();
        return Ok(());
    }

    Logger::init(&cli.output);
    let total_start = Instant::now();
    log!("===== Starting Memory Trace Processing =====");

    // 1. 곡선 준비
    log!("\n[1/5] Loading performance curves...");
    let load_start = Instant::now();

    let entry = db.find(&config.cpu_model, &config.memory_system)?;
    let pmu_type = PmuType::from_str(&entry.pmu_type)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let curves = Curves::load(&data_path, entry)?;

    log!(
        "Curves loaded for {} / {} ({}, {}): Time taken: {:.2}s",
        config.cpu_model,
        config.memory_system,
        entry.pmu_type,
        entry.cpu_microarchitecture,
        load_start.elapsed().as_secs_f64()
    );

    // 2. 트레이스 메타데이터 파싱
    log!("\n[2/5] Parsing trace metadata (.pcf/.row)...");
    let meta_start = Instant::now();

    let pcf_input = companion_path(&cli.input, "pcf");
    let row_input = companion_path(&cli.input, "row");
    let mem_event_types = extract_memory_event_types(&pcf_input, pmu_type)?;
    let in_row = RowFile::parse(&row_input)?;

    let mcs_per_socket = controllers_per_socket(&mem_event_types);
    let total_mcs: usize = mcs_per_socket.values().map(|v| v.len()).sum();
    log!(
        "Found {} memory counter event types ({} sockets, {} controllers): Time taken: {:.2}s",
        mem_event_types.len(),
        mcs_per_socket.len(),
        total_mcs,
        meta_start.elapsed().as_secs_f64()
    );

    // 3. 입력 트레이스 헤더와 노드 집계기 준비
    log!("\n[3/5] Preparing node aggregators...");

    let input_file = File::open(&cli.input).map_err(|e| {
        io::Error::new(e.kind(), format!("Error opening input trace '{}': {e}", cli.input))
    })?;
    let mut reader = BufReader::new(input_file);
    let header = TraceHeader::parse(&mut reader)?;

    let n_nodes = header.resource.total_nodes();
    let node_names = in_row.node_names(n_nodes);
    let mut nodes: Vec<NodeMemoryRecords> = (0..n_nodes)
        .map(|i| {
            NodeMemoryRecords::new(
                i,
                node_names[i].clone(),
                &mcs_per_socket,
                cli.per_socket,
                config.cpu_freq_ghz,
                config.cache_line_bytes,
            )
        })
        .collect();

    let output_process = build_output_process_model(&header.process, &nodes, cli.per_socket);
    log!(
        "{} node(s), aggregation mode: {}",
        n_nodes,
        if cli.per_socket { "per socket" } else { "per memory controller" }
    );

    // 4. 스트리밍 병합 처리
    log!("\n[4/5] Processing trace records...");
    let process_start = Instant::now();

    let output_file = File::create(&cli.output).map_err(|e| {
        io::Error::new(e.kind(), format!("Error opening output trace '{}': {e}", cli.output))
    })?;
    let mut writer = BufWriter::new(output_file);

    let options = SchedulerOptions {
        keep_original: cli.keep_original,
        export_csv: cli.export_csv,
    };
    let stats = run_scheduler(
        &mut reader,
        &mut writer,
        &header,
        &output_process,
        &mem_event_types,
        &mut nodes,
        &curves,
        options,
    )?;
    drop(writer);

    log!(
        "Trace processing complete: {} records read, {} passed through, \
         {} metric vectors ({} events) written (Time taken: {:.2}s)",
        stats.input_records,
        stats.passthrough_records,
        stats.metric_vectors,
        stats.metric_events,
        process_start.elapsed().as_secs_f64()
    );

    // 5. 부속 파일 출력
    log!("\n[5/5] Writing companion files...");

    let pcf_output = companion_path(&cli.output, "pcf");
    let row_output = companion_path(&cli.output, "row");
    write_output_pcf(
        &pcf_input,
        &pcf_output,
        &mem_event_types,
        &METRIC_LABELS,
        cli.keep_original,
    )?;

    let app0_tasks = header.process.apps.first().map_or(0, |t| t.len());
    let app0_threads: usize = header
        .process
        .apps
        .first()
        .map_or(0, |t| t.iter().map(|task| task.n_threads).sum());
    write_output_row(
        &in_row,
        &row_output,
        app0_tasks,
        app0_threads,
        &nodes,
        cli.per_socket,
    )?;

    if cli.export_csv {
        let csv_output = companion_path(&cli.output, "csv");
        save_metrics_to_csv(&csv_output, &stats.csv_rows)?;
        log!("- Metrics CSV file: {}", csv_output.display());
    }

    log!("- Output pcf file: {}", pcf_output.display());
    log!("- Output row file: {}", row_output.display());

    log!(
        "\n===== All Processing Complete! ===== (Total time: {:.2}s)",
        total_start.elapsed().as_secs_f64()
    );

    print_final_summary(&nodes, &cli.output);

    let _ = Logger::flush();
    Ok(())
}
