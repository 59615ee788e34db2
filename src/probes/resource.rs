// Resource-usage profile of the console process
// Peak RSS and CPU time from getrusage

use async_trait::async_trait;

use crate::config::ProfileProbeConfig;
use crate::model::{Category, MeasurementRecord};
use crate::orchestrator::{MeasurementSource, SourceError};

pub struct ProfileProbe {
    config: ProfileProbeConfig,
}

impl ProfileProbe {
    pub fn new(config: ProfileProbeConfig) -> Self {
        Self { config }
    }
}

/// Raw counters for the current process
#[derive(Debug, Clone, Copy)]
pub struct ProcessUsage {
    pub max_rss_mb: f64,
    pub user_cpu_secs: f64,
    pub system_cpu_secs: f64,
}

#[cfg(unix)]
pub fn process_usage() -> Result<ProcessUsage, SourceError> {
    // SAFETY: getrusage only writes into the zeroed struct we own.
    let usage = unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return Err(SourceError::Io(std::io::Error::last_os_error()));
        }
        usage
    };

    // Linux reports kilobytes, macOS bytes
    #[cfg(target_os = "macos")]
    let max_rss_mb = usage.ru_maxrss as f64 / (1024.0 * 1024.0);
    #[cfg(not(target_os = "macos"))]
    let max_rss_mb = usage.ru_maxrss as f64 / 1024.0;

    Ok(ProcessUsage {
        max_rss_mb,
        user_cpu_secs: timeval_secs(usage.ru_utime),
        system_cpu_secs: timeval_secs(usage.ru_stime),
    })
}

#[cfg(not(unix))]
pub fn process_usage() -> Result<ProcessUsage, SourceError> {
    Err(SourceError::Misconfigured(
        "process profiling is only available on unix".to_string(),
    ))
}

#[cfg(unix)]
fn timeval_secs(tv: libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0
}

#[async_trait]
impl MeasurementSource for ProfileProbe {
    fn name(&self) -> &str {
        "profile"
    }

    fn category(&self) -> Category {
        Category::Profile
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && cfg!(unix)
    }

    async fn measure(&self) -> Result<Vec<MeasurementRecord>, SourceError> {
        let usage = process_usage()?;
        let cpus = num_cpus::get();
        let cpu_secs = usage.user_cpu_secs + usage.system_cpu_secs;

        Ok(vec![
            MeasurementRecord::graded("process.max_rss_mb", Category::Profile, usage.max_rss_mb, self.config.max_rss_mb)
                .with_extension("unit", "MiB")
                .with_extension("cpus", cpus),
            MeasurementRecord::graded("process.cpu_secs", Category::Profile, cpu_secs, self.config.max_cpu_secs)
                .with_extension("unit", "s")
                .with_extension("user_secs", usage.user_cpu_secs)
                .with_extension("system_secs", usage.system_cpu_secs)
                .with_extension("cpus", cpus),
        ])
    }
}
