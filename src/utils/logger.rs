use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::sync::Once;
use std::sync::OnceLock;

// 전역 로거 인스턴스를 저장할 정적 변수
static LOGGER: OnceLock<Mutex<Option<File>>> = OnceLock::new();
static INIT: Once = Once::new();

// 경고/정보 메시지 표시 여부 (-w, -t 옵션으로 제어)
static DISPLAY_WARNINGS: AtomicBool = AtomicBool::new(true);
static DISPLAY_TEXT: AtomicBool = AtomicBool::new(true);

pub struct Logger;

impl Logger {
    pub fn init(output_path: &str) {
        INIT.call_once(|| {
            let output_path = output_path.trim_end_matches('/');
            let path = Path::new(output_path);

            // 출력 트레이스와 같은 위치에 로그 파일 생성 (.prv 확장자는 제거)
            let log_path = if path.is_dir() || output_path.ends_with('/') {
                path.join("result.log")
            } else {
                let dir = path.parent().unwrap_or_else(|| Path::new("."));
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("output")
                    .trim_end_matches(".prv")
                    .to_string();

                dir.join(format!("{file_name}_result.log"))
            };

            let log_dir = log_path.parent().unwrap_or_else(|| Path::new("."));
            if !log_dir.exists() {
                if let Err(e) = fs::create_dir_all(log_dir) {
                    eprintln!("로그 디렉토리를 생성할 수 없습니다: {e}");
                    LOGGER.get_or_init(|| Mutex::new(None));
                    return;
                }
            }

            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&log_path);

            match file {
                Ok(file) => {
                    LOGGER.get_or_init(|| Mutex::new(Some(file)));
                }
                Err(e) => {
                    eprintln!("로그 파일을 열 수 없습니다: {e}");
                    LOGGER.get_or_init(|| Mutex::new(None));
                }
            }
        });
    }

    pub fn log(message: &str) {
        // -t 옵션이 주어지면 콘솔에는 출력하지 않고 파일에만 기록
        if DISPLAY_TEXT.load(Ordering::Relaxed) {
            println!("{message}");
        }

        Self::write_to_file(message);
    }

    pub fn log_error(message: &str) {
        eprintln!("{message}");
        Self::write_to_file(&format!("ERROR: {message}"));
    }

    pub fn log_warn(message: &str) {
        // 경고는 -w 옵션으로 완전히 억제 가능
        if !DISPLAY_WARNINGS.load(Ordering::Relaxed) {
            return;
        }
        eprintln!("Warning: {message}");
        Self::write_to_file(&format!("WARNING: {message}"));
    }

    fn write_to_file(message: &str) {
        if let Some(logger) = LOGGER.get() {
            if let Ok(mut file_guard) = logger.lock() {
                if let Some(file) = file_guard.as_mut() {
                    if let Err(e) = writeln!(file, "{message}") {
                        eprintln!("로그 파일 쓰기 실패: {e}");
                    }
                }
            }
        }
    }

    pub fn flush() -> std::io::Result<()> {
        if let Some(logger) = LOGGER.get() {
            if let Ok(mut file_guard) = logger.lock() {
                if let Some(file) = file_guard.as_mut() {
                    file.flush()?;
                }
            }
        }
        Ok(())
    }
}

/// 경고 메시지 표시 여부 설정 (-w 옵션)
pub fn set_display_warnings(display: bool) {
    DISPLAY_WARNINGS.store(display, Ordering::Relaxed);
}

pub fn display_warnings() -> bool {
    DISPLAY_WARNINGS.load(Ordering::Relaxed)
}

/// 정보 텍스트 표시 여부 설정 (-t 옵션)
pub fn set_display_text(display: bool) {
    DISPLAY_TEXT.store(display, Ordering::Relaxed);
}

// 매크로 정의
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::utils::Logger::log(&message);
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::utils::Logger::log_error(&message);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::utils::Logger::log_warn(&message);
    }};
}
