use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{config::LogSettings, errors::Error, Result};

/// Initialize logging/tracing for the bot.
///
/// Logs go to stdout and to a size-rotated log file written from a background
/// thread. `RUST_LOG` overrides the default filter. Keep the returned guard
/// alive for the life of the process; dropping it flushes pending lines.
pub fn init(service_name: &str, settings: &LogSettings) -> Result<WorkerGuard> {
    // Default: info for our crates, warn for everything else.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,rcb=info,rcb_core=info,rcb_feed=info,rcb_deepseek=info,rcb_telegram=info,{service_name}=info"
        ))
    });

    let (writer, guard) = file_writer(settings)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(true))
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("failed to initialize logging: {e}")))?;

    Ok(guard)
}

/// Rotating log file behind a background writer thread.
pub fn file_writer(settings: &LogSettings) -> Result<(NonBlocking, WorkerGuard)> {
    let file = RotatingFile::open(&settings.file, settings.max_bytes)?;
    Ok(tracing_appender::non_blocking(file))
}

/// Append-only log file rotated when it grows past `max_bytes`.
///
/// On rotation the current file becomes `<name>.1` (replacing any previous
/// backup) and a fresh file is opened.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            file,
            written,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.backup_path())?;
        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0
            && self.written > 0
            && self.written + buf.len() as u64 > self.max_bytes
        {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{}-{ts}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn rotates_past_threshold() {
        let dir = tmp_dir("rcb-log-rotate");
        let path = dir.join("bot.log");
        let mut f = RotatingFile::open(&path, 32).unwrap();

        f.write_all(&[b'a'; 20]).unwrap();
        f.write_all(&[b'b'; 20]).unwrap();
        f.flush().unwrap();

        let backup = std::fs::read(f.backup_path()).unwrap();
        let current = std::fs::read(&path).unwrap();
        assert_eq!(backup, vec![b'a'; 20]);
        assert_eq!(current, vec![b'b'; 20]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn background_writer_lands_in_rotating_file() {
        let dir = tmp_dir("rcb-log-nonblocking");
        let settings = LogSettings {
            file: dir.join("bot.log"),
            max_bytes: 1024,
        };

        let (mut writer, guard) = file_writer(&settings).unwrap();
        writer.write_all(b"cycle done\n").unwrap();
        drop(guard);

        assert_eq!(
            std::fs::read(&settings.file).unwrap(),
            b"cycle done\n".to_vec()
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn resumes_size_from_existing_file() {
        let dir = tmp_dir("rcb-log-resume");
        let path = dir.join("bot.log");
        std::fs::write(&path, [b'x'; 30]).unwrap();

        let mut f = RotatingFile::open(&path, 32).unwrap();
        f.write_all(b"yyyy").unwrap();
        f.flush().unwrap();

        assert!(f.backup_path().exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"yyyy".to_vec());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
