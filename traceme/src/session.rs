use std::{
    io,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone};
use serde::{Serialize, Serializer};

use crate::backend::{BackendStopper, StopSignal};

const TRACE_ID_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Session key for a peer: the host part of its address only.
pub fn client_identity(addr: &SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        ip => ip.to_string(),
    }
}

pub fn trace_id_for<Tz>(identity: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("{identity}-{}", at.format(TRACE_ID_TIME_FORMAT))
}

pub fn channel_path(socket_root: &Path, identity: &str) -> PathBuf {
    socket_root.join(format!("server-{identity}.sock"))
}

/// On-disk layout of the recording side of the trace store.
#[derive(Clone, Debug)]
pub struct TraceLayout {
    root: PathBuf,
}

impl TraceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, trace_id: &str) -> PathBuf {
        self.root.join(trace_id)
    }

    pub fn raw_trace_dir(&self, trace_id: &str) -> PathBuf {
        self.session_dir(trace_id).join("trace")
    }

    pub fn archive_path(&self, trace_id: &str) -> PathBuf {
        self.session_dir(trace_id).join("trace.tar.zst")
    }

    /// Creates a fresh session directory for `base_id`, appending `-1`, `-2`, ...
    /// while an earlier session already owns the name. Returns the trace id used.
    pub fn claim_session_dir(&self, base_id: &str) -> io::Result<String> {
        std::fs::create_dir_all(&self.root)?;
        let mut suffix = 0u32;
        loop {
            let trace_id = if suffix == 0 {
                base_id.to_string()
            } else {
                format!("{base_id}-{suffix}")
            };
            match std::fs::create_dir(self.session_dir(&trace_id)) {
                Ok(()) => return Ok(trace_id),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(err) => return Err(err),
            }
        }
    }
}

/// One client's live recorded backend.
pub struct Session {
    identity: String,
    trace_id: String,
    started_at: Instant,
    channel: PathBuf,
    stopper: Box<dyn BackendStopper>,
    stop_requested: AtomicBool,
}

impl Session {
    pub fn new(
        identity: impl Into<String>,
        trace_id: impl Into<String>,
        channel: impl Into<PathBuf>,
        stopper: Box<dyn BackendStopper>,
    ) -> Self {
        Self {
            identity: identity.into(),
            trace_id: trace_id.into(),
            started_at: Instant::now(),
            channel: channel.into(),
            stopper,
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn channel(&self) -> &Path {
        &self.channel
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Signals the backend the first time it is called; later calls return `Ok(false)`.
    pub fn request_stop(&self, signal: StopSignal) -> io::Result<bool> {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        if let Err(err) = self.stopper.stop(signal) {
            self.stop_requested.store(false, Ordering::SeqCst);
            return Err(err);
        }
        Ok(true)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            identity: self.identity.clone(),
            trace_id: self.trace_id.clone(),
            age: self.age(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub identity: String,
    pub trace_id: String,
    #[serde(rename = "age_seconds", serialize_with = "serialize_seconds")]
    pub age: Duration,
}

fn serialize_seconds<S: Serializer>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(age.as_secs())
}

/// Renders an age the way `1h2m3s` reads, dropping leading zero units.
pub fn format_age(age: Duration) -> String {
    let total = age.as_secs();
    if total == 0 {
        return format!("{}ms", age.as_millis());
    }
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{Ipv4Addr, Ipv6Addr, SocketAddrV6},
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use chrono::Utc;

    use super::*;

    struct CountingStopper(Arc<AtomicUsize>);

    impl BackendStopper for CountingStopper {
        fn stop(&self, _signal: StopSignal) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn identity_drops_port() {
        let addr = SocketAddr::from((Ipv4Addr::new(10, 0, 0, 5), 51234));
        assert_eq!(client_identity(&addr), "10.0.0.5");
    }

    #[test]
    fn identity_unwraps_ipv4_mapped_ipv6() {
        let mapped = Ipv4Addr::new(192, 168, 1, 7).to_ipv6_mapped();
        let addr = SocketAddr::V6(SocketAddrV6::new(mapped, 80, 0, 0));
        assert_eq!(client_identity(&addr), "192.168.1.7");

        let addr = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 80, 0, 0));
        assert_eq!(client_identity(&addr), "::1");
    }

    #[test]
    fn trace_id_appends_timestamp() {
        let at = Utc
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("timestamp should be valid");
        assert_eq!(trace_id_for("10.0.0.5", &at), "10.0.0.5-2024-03-09-14-05-07");
    }

    #[test]
    fn layout_places_archive_next_to_raw_trace() {
        let layout = TraceLayout::new("/var/traceme");
        assert_eq!(
            layout.raw_trace_dir("a-1"),
            PathBuf::from("/var/traceme/a-1/trace")
        );
        assert_eq!(
            layout.archive_path("a-1"),
            PathBuf::from("/var/traceme/a-1/trace.tar.zst")
        );
        assert_eq!(
            channel_path(Path::new("/var/run"), "10.0.0.5"),
            PathBuf::from("/var/run/server-10.0.0.5.sock")
        );
    }

    #[test]
    fn claimed_session_dirs_never_collide() {
        let scratch = tempfile::tempdir().expect("tempdir");
        let layout = TraceLayout::new(scratch.path().join("traces"));

        let first = layout.claim_session_dir("10.0.0.5-t").expect("first claim");
        let second = layout.claim_session_dir("10.0.0.5-t").expect("second claim");
        let third = layout.claim_session_dir("10.0.0.5-t").expect("third claim");

        assert_eq!(first, "10.0.0.5-t");
        assert_eq!(second, "10.0.0.5-t-1");
        assert_eq!(third, "10.0.0.5-t-2");
        assert!(layout.session_dir(&third).is_dir());
    }

    #[test]
    fn stop_is_delivered_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let session = Session::new(
            "10.0.0.5",
            "10.0.0.5-x",
            "/tmp/x.sock",
            Box::new(CountingStopper(count.clone())),
        );
        assert!(session.request_stop(StopSignal::Terminate).expect("stop"));
        assert!(!session.request_stop(StopSignal::Terminate).expect("stop"));
        assert!(!session.request_stop(StopSignal::Interrupt).expect("stop"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn age_formatting() {
        assert_eq!(format_age(Duration::from_millis(250)), "250ms");
        assert_eq!(format_age(Duration::from_secs(42)), "42s");
        assert_eq!(format_age(Duration::from_secs(125)), "2m5s");
        assert_eq!(format_age(Duration::from_secs(3607)), "1h0m7s");
    }
}
