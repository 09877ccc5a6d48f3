use crate::session::SessionStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use zbus::object_server::SignalEmitter;
use zbus::{interface, Connection};

pub const BUS_NAME: &str = "org.freedesktop.Posecap1";
pub const OBJECT_PATH: &str = "/org/freedesktop/Posecap1";

/// D-Bus interface a host shell uses to embed the capture app.
///
/// Bus name: org.freedesktop.Posecap1
/// Object path: /org/freedesktop/Posecap1
pub struct PosecapHost {
    status: watch::Receiver<SessionStatus>,
}

#[interface(name = "org.freedesktop.Posecap1")]
impl PosecapHost {
    /// Current session snapshot as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        status_json(&self.status.borrow()).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// The app has started and is ready to be shown.
    #[zbus(signal)]
    async fn ready(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;
}

pub fn status_json(status: &SessionStatus) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "session": status,
    }))
}

/// A live session-bus registration.
pub struct HostBridge {
    connection: Connection,
    announced: AtomicBool,
}

impl HostBridge {
    pub async fn connect(status: watch::Receiver<SessionStatus>) -> zbus::Result<Self> {
        let connection = zbus::connection::Builder::session()?
            .name(BUS_NAME)?
            .serve_at(OBJECT_PATH, PosecapHost { status })?
            .build()
            .await?;
        tracing::info!(name = BUS_NAME, "host bridge registered");
        Ok(Self {
            connection,
            announced: AtomicBool::new(false),
        })
    }

    /// Emit `Ready`. Only the first call sends anything.
    pub async fn announce_ready(&self) -> zbus::Result<()> {
        if self.announced.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let iface = self
            .connection
            .object_server()
            .interface::<_, PosecapHost>(OBJECT_PATH)
            .await?;
        PosecapHost::ready(iface.signal_emitter()).await
    }
}

/// Connect and announce readiness; without a session bus the app runs on
/// standalone.
pub async fn start(status: watch::Receiver<SessionStatus>) -> Option<HostBridge> {
    let bridge = match HostBridge::connect(status).await {
        Ok(bridge) => bridge,
        Err(e) => {
            tracing::warn!(error = %e, "no host bridge, continuing standalone");
            return None;
        }
    };
    if let Err(e) = bridge.announce_ready().await {
        tracing::warn!(error = %e, "failed to announce readiness");
    }
    Some(bridge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_wraps_session() {
        let json: serde_json::Value =
            serde_json::from_str(&status_json(&SessionStatus::idle(3)).unwrap()).unwrap();
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["session"]["total_steps"], 3);
        assert_eq!(json["session"]["captured"], 0);
    }
}
