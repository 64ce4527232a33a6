use crate::error::CoreError;
use crate::events::{Event, EventBus};
use crate::link::{GatewayLink, TunnelLink, TunnelTarget};
use catflap_config::{GatewayConfig, ReconnectConfig};
use catflap_keychain::DeviceIdentity;
use catflap_ssh::TunnelError;
use catflap_transport::ConnectOptions;
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Error(String),
}

#[derive(Clone, Debug)]
pub enum ConnectTarget {
    Direct { url: String },
    Tunneled(TunnelTarget),
}

/// Credentials saved after a successful connect, reused by every
/// reconnect path until an explicit disconnect clears them.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub target: ConnectTarget,
    pub token: String,
}

/// Delay before reconnect attempt `attempt` (1-based):
/// `min(cap, base * factor^attempt)` seconds.
pub fn backoff_delay(attempt: u32, cfg: &ReconnectConfig) -> Duration {
    let secs = (cfg.backoff_base_secs * cfg.backoff_factor.powi(attempt as i32))
        .min(cfg.backoff_cap_secs);
    Duration::from_secs_f64(secs)
}

/// Drives the tunnel and transport through connect, silent-reconnect,
/// auto-reconnect, and health-check cycles. Owns its links; only one
/// tunnel and one transport connection are live at a time, and every
/// reconnect fully tears down the previous pair first.
///
/// The health loop and the reconnect loop are mutually exclusive:
/// starting either stops the other.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    tunnel: Arc<dyn TunnelLink>,
    gateway: Arc<dyn GatewayLink>,
    identity: DeviceIdentity,
    gateway_cfg: GatewayConfig,
    cfg: ReconnectConfig,
    bus: EventBus,
    creds: SyncMutex<Option<Credentials>>,
    attempts: AtomicU32,
    status: SyncMutex<LinkStatus>,
    loops: SyncMutex<Loops>,
}

#[derive(Default)]
struct Loops {
    health: Option<Arc<CancellationToken>>,
    reconnect: Option<Arc<CancellationToken>>,
    listener: Option<Arc<CancellationToken>>,
}

impl ConnectionSupervisor {
    pub fn new(
        tunnel: Arc<dyn TunnelLink>,
        gateway: Arc<dyn GatewayLink>,
        identity: DeviceIdentity,
        gateway_cfg: GatewayConfig,
        cfg: ReconnectConfig,
        bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                tunnel,
                gateway,
                identity,
                gateway_cfg,
                cfg,
                bus,
                creds: SyncMutex::new(None),
                attempts: AtomicU32::new(0),
                status: SyncMutex::new(LinkStatus::Disconnected),
                loops: SyncMutex::new(Loops::default()),
            }),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.inner.status.lock().clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Fresh connect: tear down anything live, establish the tunnel (if
    /// the target calls for one) and the transport, then start the event
    /// listener and the health loop.
    pub async fn connect(&self, creds: Credentials) -> Result<(), CoreError> {
        self.stop_loops();
        self.teardown().await;
        self.set_status(LinkStatus::Connecting);
        match self.establish(&creds).await {
            Ok(()) => {
                *self.inner.creds.lock() = Some(creds);
                self.inner.attempts.store(0, Ordering::SeqCst);
                self.start_event_listener();
                self.start_health_loop();
                self.set_status(LinkStatus::Connected);
                Ok(())
            }
            Err(err) => {
                self.set_status(LinkStatus::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Re-establish the link with the saved credentials without touching
    /// higher-level application state. A retryable failure falls back to
    /// the auto-reconnect loop instead of surfacing an error.
    pub async fn silent_reconnect(&self) -> Result<(), CoreError> {
        let creds = self
            .inner
            .creds
            .lock()
            .clone()
            .ok_or(CoreError::NoCredentials)?;
        self.stop_loops();
        self.teardown().await;
        self.set_status(LinkStatus::Connecting);
        match self.establish(&creds).await {
            Ok(()) => {
                self.inner.attempts.store(0, Ordering::SeqCst);
                self.start_event_listener();
                self.start_health_loop();
                self.set_status(LinkStatus::Connected);
                info!("silent reconnect succeeded");
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                self.set_status(LinkStatus::Error(fatal_message(&err)));
                Err(err)
            }
            Err(err) => {
                debug!(error = %err, "silent reconnect failed, entering auto-reconnect");
                self.start_reconnect_loop();
                Ok(())
            }
        }
    }

    /// User-initiated teardown: stops every loop, closes transport and
    /// tunnel, clears saved credentials.
    pub async fn disconnect(&self) {
        self.stop_loops();
        self.teardown().await;
        *self.inner.creds.lock() = None;
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.set_status(LinkStatus::Disconnected);
    }

    /// Start the cancellable auto-reconnect loop. No-op if one is already
    /// running; stops the health loop.
    pub fn start_reconnect_loop(&self) {
        let cancel = {
            let mut loops = self.inner.loops.lock();
            if loops.reconnect.is_some() {
                return;
            }
            if let Some(token) = loops.health.take() {
                token.cancel();
            }
            let cancel = Arc::new(CancellationToken::new());
            loops.reconnect = Some(cancel.clone());
            cancel
        };
        let this = self.clone();
        tokio::spawn(async move { this.run_reconnect_loop(cancel).await });
    }

    async fn establish(&self, creds: &Credentials) -> Result<(), CoreError> {
        let url = match &creds.target {
            ConnectTarget::Direct { url } => url.clone(),
            ConnectTarget::Tunneled(target) => {
                let local_port = self
                    .inner
                    .tunnel
                    .open(target, &self.inner.identity)
                    .await?;
                format!("ws://127.0.0.1:{}", local_port)
            }
        };
        let opts = self.connect_options(&url, &creds.token);
        self.inner
            .gateway
            .connect(&opts, &self.inner.identity)
            .await?;
        Ok(())
    }

    async fn teardown(&self) {
        self.inner.gateway.disconnect().await;
        self.inner.tunnel.close().await;
    }

    fn connect_options(&self, url: &str, token: &str) -> ConnectOptions {
        let g = &self.inner.gateway_cfg;
        ConnectOptions {
            url: url.to_string(),
            token: token.to_string(),
            client_id: g.client_id.clone(),
            client_mode: g.client_mode.clone(),
            display_name: g.display_name.clone(),
            role: g.role.clone(),
            scopes: g.scopes.clone(),
            min_protocol: g.min_protocol,
            max_protocol: g.max_protocol,
            connect_timeout_ms: g.connect_timeout_ms,
        }
    }

    async fn run_reconnect_loop(&self, cancel: Arc<CancellationToken>) {
        info!("auto-reconnect loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(creds) = self.inner.creds.lock().clone() else {
                self.set_status(LinkStatus::Disconnected);
                break;
            };
            let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_status(LinkStatus::Reconnecting { attempt });
            self.teardown().await;
            match self.establish(&creds).await {
                Ok(()) => {
                    info!(attempt, "reconnected");
                    self.inner.attempts.store(0, Ordering::SeqCst);
                    self.start_event_listener();
                    self.start_health_loop();
                    self.set_status(LinkStatus::Connected);
                    self.inner.bus.send(Event::SessionRestored);
                    break;
                }
                Err(err) if err.is_fatal() => {
                    warn!(error = %err, "fatal failure, aborting auto-reconnect");
                    self.set_status(LinkStatus::Error(fatal_message(&err)));
                    break;
                }
                Err(err) => {
                    let delay = backoff_delay(attempt, &self.inner.cfg);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "reconnect attempt failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        self.clear_reconnect_slot(&cancel);
    }

    fn start_health_loop(&self) {
        let cancel = {
            let mut loops = self.inner.loops.lock();
            if let Some(token) = loops.reconnect.take() {
                token.cancel();
            }
            if let Some(token) = loops.health.take() {
                token.cancel();
            }
            let cancel = Arc::new(CancellationToken::new());
            loops.health = Some(cancel.clone());
            cancel
        };
        let this = self.clone();
        tokio::spawn(async move { this.run_health_loop(cancel).await });
    }

    async fn run_health_loop(&self, cancel: Arc<CancellationToken>) {
        let interval = Duration::from_secs(self.inner.cfg.health_interval_secs);
        let timeout = Duration::from_secs(self.inner.cfg.health_timeout_secs);
        let threshold = self.inner.cfg.health_failure_threshold;
        let mut failures = 0u32;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.clear_health_slot(&cancel);
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            // race the RPC against the timeout; whichever loses is dropped
            match tokio::time::timeout(timeout, self.inner.gateway.health()).await {
                Ok(Ok(_)) => {
                    failures = 0;
                }
                Ok(Err(err)) => {
                    failures += 1;
                    warn!(failures, error = %err, "health check failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(failures, "health check timed out");
                }
            }
            if failures >= threshold {
                warn!(threshold, "consecutive health failures, reconnecting");
                break;
            }
        }
        self.clear_health_slot(&cancel);
        if !cancel.is_cancelled() {
            self.start_reconnect_loop();
        }
    }

    fn start_event_listener(&self) {
        let Some(mut events) = self.inner.gateway.take_events() else {
            warn!("gateway connection has no event stream to listen on");
            return;
        };
        let cancel = {
            let mut loops = self.inner.loops.lock();
            if let Some(token) = loops.listener.take() {
                token.cancel();
            }
            let cancel = Arc::new(CancellationToken::new());
            loops.listener = Some(cancel.clone());
            cancel
        };
        let this = self.clone();
        tokio::spawn(async move {
            let ended = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break false,
                    event = events.recv() => match event {
                        Some(event) => this.inner.bus.send(Event::Gateway {
                            event: event.event,
                            payload: event.payload,
                            seq: event.seq,
                        }),
                        None => break true,
                    }
                }
            };
            this.clear_listener_slot(&cancel);
            // stream closure while we believe we are connected is an
            // implicit disconnect
            if ended && !cancel.is_cancelled() && this.status() == LinkStatus::Connected {
                warn!("event stream ended while connected, reconnecting");
                this.start_reconnect_loop();
            }
        });
    }

    fn stop_loops(&self) {
        let mut loops = self.inner.loops.lock();
        for token in [
            loops.health.take(),
            loops.reconnect.take(),
            loops.listener.take(),
        ]
        .into_iter()
        .flatten()
        {
            token.cancel();
        }
    }

    fn set_status(&self, status: LinkStatus) {
        {
            let mut current = self.inner.status.lock();
            if *current == status {
                return;
            }
            *current = status.clone();
        }
        self.inner.bus.send(Event::LinkStateChanged { status });
    }

    fn clear_reconnect_slot(&self, token: &Arc<CancellationToken>) {
        let mut loops = self.inner.loops.lock();
        if loops
            .reconnect
            .as_ref()
            .map(|t| Arc::ptr_eq(t, token))
            .unwrap_or(false)
        {
            loops.reconnect = None;
        }
    }

    fn clear_health_slot(&self, token: &Arc<CancellationToken>) {
        let mut loops = self.inner.loops.lock();
        if loops
            .health
            .as_ref()
            .map(|t| Arc::ptr_eq(t, token))
            .unwrap_or(false)
        {
            loops.health = None;
        }
    }

    fn clear_listener_slot(&self, token: &Arc<CancellationToken>) {
        let mut loops = self.inner.loops.lock();
        if loops
            .listener
            .as_ref()
            .map(|t| Arc::ptr_eq(t, token))
            .unwrap_or(false)
        {
            loops.listener = None;
        }
    }
}

fn fatal_message(err: &CoreError) -> String {
    match err {
        CoreError::Tunnel(TunnelError::HostKeyMismatch(host)) => {
            format!("host key mismatch for {}", host)
        }
        _ => format!("authentication failed: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use catflap_transport::{EventFrame, TransportError};
    use serde_json::Value;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    #[derive(Clone, Copy, Debug)]
    enum Script {
        Ok,
        Retryable,
        Fatal,
    }

    impl Script {
        fn into_result(self) -> Result<Value, TransportError> {
            match self {
                Script::Ok => Ok(Value::Null),
                Script::Retryable => Err(TransportError::Timeout),
                Script::Fatal => Err(TransportError::Server {
                    code: Some("unauthorized".to_string()),
                    message: "bad token".to_string(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeTunnel {
        opens: AtomicU32,
        closes: AtomicU32,
    }

    #[async_trait]
    impl TunnelLink for FakeTunnel {
        async fn open(
            &self,
            _target: &TunnelTarget,
            _identity: &DeviceIdentity,
        ) -> Result<u16, TunnelError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(45678)
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeGateway {
        connects: SyncMutex<VecDeque<Script>>,
        default_connect: SyncMutex<Script>,
        healths: SyncMutex<VecDeque<Script>>,
        log: SyncMutex<Vec<&'static str>>,
        last_url: SyncMutex<Option<String>>,
        events_tx: SyncMutex<Option<mpsc::Sender<EventFrame>>>,
        events_rx: SyncMutex<Option<mpsc::Receiver<EventFrame>>>,
    }

    impl FakeGateway {
        fn new() -> Self {
            Self {
                connects: SyncMutex::new(VecDeque::new()),
                default_connect: SyncMutex::new(Script::Ok),
                healths: SyncMutex::new(VecDeque::new()),
                log: SyncMutex::new(Vec::new()),
                last_url: SyncMutex::new(None),
                events_tx: SyncMutex::new(None),
                events_rx: SyncMutex::new(None),
            }
        }

        fn script_connects(&self, scripts: &[Script]) {
            self.connects.lock().extend(scripts.iter().copied());
        }

        fn script_healths(&self, scripts: &[Script]) {
            self.healths.lock().extend(scripts.iter().copied());
        }

        fn set_default_connect(&self, script: Script) {
            *self.default_connect.lock() = script;
        }

        fn connect_calls(&self) -> usize {
            self.log.lock().iter().filter(|c| **c == "connect").count()
        }

        fn drop_event_stream(&self) {
            self.events_tx.lock().take();
        }

        fn calls_before_nth_connect(&self, n: usize, call: &str) -> usize {
            let log = self.log.lock();
            let mut connects = 0;
            let mut count = 0;
            for entry in log.iter() {
                if *entry == "connect" {
                    connects += 1;
                    if connects == n {
                        break;
                    }
                } else if *entry == call {
                    count += 1;
                }
            }
            count
        }
    }

    #[async_trait]
    impl GatewayLink for FakeGateway {
        async fn connect(
            &self,
            opts: &ConnectOptions,
            _identity: &DeviceIdentity,
        ) -> Result<Value, TransportError> {
            self.log.lock().push("connect");
            *self.last_url.lock() = Some(opts.url.clone());
            let script = self
                .connects
                .lock()
                .pop_front()
                .unwrap_or(*self.default_connect.lock());
            let result = script.into_result();
            if result.is_ok() {
                let (tx, rx) = mpsc::channel(16);
                *self.events_tx.lock() = Some(tx);
                *self.events_rx.lock() = Some(rx);
            }
            result
        }

        async fn disconnect(&self) {
            self.log.lock().push("disconnect");
            self.events_tx.lock().take();
        }

        async fn health(&self) -> Result<Value, TransportError> {
            self.log.lock().push("health");
            let script = self.healths.lock().pop_front().unwrap_or(Script::Ok);
            script.into_result()
        }

        fn take_events(&self) -> Option<mpsc::Receiver<EventFrame>> {
            self.events_rx.lock().take()
        }
    }

    fn supervisor(gateway: Arc<FakeGateway>) -> (ConnectionSupervisor, Arc<FakeTunnel>) {
        let tunnel = Arc::new(FakeTunnel::default());
        let sup = ConnectionSupervisor::new(
            tunnel.clone(),
            gateway,
            DeviceIdentity::generate().unwrap(),
            GatewayConfig::default(),
            ReconnectConfig::default(),
            EventBus::new(64),
        );
        (sup, tunnel)
    }

    fn direct_creds() -> Credentials {
        Credentials {
            target: ConnectTarget::Direct {
                url: "wss://gateway.example.com".to_string(),
            },
            token: "tok123".to_string(),
        }
    }

    fn tunneled_creds() -> Credentials {
        Credentials {
            target: ConnectTarget::Tunneled(TunnelTarget {
                host: "bastion.example.com".to_string(),
                port: 22,
                username: "claw".to_string(),
                remote_host: "localhost".to_string(),
                remote_port: 18789,
            }),
            token: "tok123".to_string(),
        }
    }

    async fn wait_until(mut f: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("condition never reached");
    }

    #[test]
    fn backoff_sequence_matches_the_curve() {
        let cfg = ReconnectConfig::default();
        let expected = [0.85, 1.445, 2.4565, 4.17605, 7.099285];
        for (i, want) in expected.iter().enumerate() {
            let got = backoff_delay(i as u32 + 1, &cfg).as_secs_f64();
            assert!((got - want).abs() < 1e-6, "attempt {}: {} != {}", i + 1, got, want);
        }
        assert_eq!(backoff_delay(6, &cfg).as_secs_f64(), 8.0);
        assert_eq!(backoff_delay(40, &cfg).as_secs_f64(), 8.0);
    }

    #[tokio::test]
    async fn fresh_connect_direct_goes_connected() {
        let gateway = Arc::new(FakeGateway::new());
        let (sup, _tunnel) = supervisor(gateway.clone());
        sup.connect(direct_creds()).await.unwrap();
        assert_eq!(sup.status(), LinkStatus::Connected);
        assert_eq!(
            gateway.last_url.lock().as_deref(),
            Some("wss://gateway.example.com")
        );
        sup.disconnect().await;
        assert_eq!(sup.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn tunneled_connect_points_transport_at_the_local_port() {
        let gateway = Arc::new(FakeGateway::new());
        let (sup, tunnel) = supervisor(gateway.clone());
        sup.connect(tunneled_creds()).await.unwrap();
        assert_eq!(tunnel.opens.load(Ordering::SeqCst), 1);
        assert_eq!(
            gateway.last_url.lock().as_deref(),
            Some("ws://127.0.0.1:45678")
        );
        sup.disconnect().await;
        assert!(tunnel.closes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn failed_connect_surfaces_error_state() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script_connects(&[Script::Retryable]);
        let (sup, _tunnel) = supervisor(gateway.clone());
        let err = sup.connect(direct_creds()).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(sup.status(), LinkStatus::Error(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn health_failures_trigger_reconnect_after_exactly_three() {
        let gateway = Arc::new(FakeGateway::new());
        // two failures, a success that resets the counter, then three
        // failures that cross the threshold
        gateway.script_healths(&[
            Script::Retryable,
            Script::Retryable,
            Script::Ok,
            Script::Retryable,
            Script::Retryable,
            Script::Retryable,
        ]);
        let (sup, _tunnel) = supervisor(gateway.clone());
        sup.connect(direct_creds()).await.unwrap();

        let g = gateway.clone();
        wait_until(move || g.connect_calls() >= 2).await;
        // the reconnect must not have fired before all six checks ran
        assert_eq!(gateway.calls_before_nth_connect(2, "health"), 6);
        let sup2 = sup.clone();
        wait_until(move || sup2.status() == LinkStatus::Connected).await;
        sup.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_retries_with_backoff_until_success() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script_connects(&[
            Script::Ok,        // initial connect
            Script::Retryable, // attempt 1
            Script::Retryable, // attempt 2
            Script::Ok,        // attempt 3 succeeds
        ]);
        let (sup, _tunnel) = supervisor(gateway.clone());
        let mut bus_rx = sup.bus().subscribe();
        sup.connect(direct_creds()).await.unwrap();

        gateway.drop_event_stream();
        let sup2 = sup.clone();
        wait_until(move || sup2.status() == LinkStatus::Connected && gateway.connect_calls() == 4)
            .await;

        let mut restored = false;
        while let Ok(event) = bus_rx.try_recv() {
            if matches!(event, Event::SessionRestored) {
                restored = true;
            }
        }
        assert!(restored, "SessionRestored must be published after a reconnect");
        sup.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_aborts_the_reconnect_loop() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script_connects(&[Script::Ok]);
        gateway.set_default_connect(Script::Fatal);
        let (sup, _tunnel) = supervisor(gateway.clone());
        sup.connect(direct_creds()).await.unwrap();

        gateway.drop_event_stream();
        let sup2 = sup.clone();
        wait_until(move || matches!(sup2.status(), LinkStatus::Error(_))).await;
        let LinkStatus::Error(message) = sup.status() else {
            unreachable!();
        };
        assert!(message.contains("authentication failed"));

        // no further attempts accumulate after the abort
        let calls = gateway.connect_calls();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(gateway.connect_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn user_disconnect_cancels_the_reconnect_loop() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.script_connects(&[Script::Ok]);
        gateway.set_default_connect(Script::Retryable);
        let (sup, _tunnel) = supervisor(gateway.clone());
        sup.connect(direct_creds()).await.unwrap();

        gateway.drop_event_stream();
        let g = gateway.clone();
        wait_until(move || g.connect_calls() >= 3).await;

        sup.disconnect().await;
        assert_eq!(sup.status(), LinkStatus::Disconnected);
        let calls = gateway.connect_calls();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(gateway.connect_calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_reconnect_reuses_saved_credentials() {
        let gateway = Arc::new(FakeGateway::new());
        let (sup, _tunnel) = supervisor(gateway.clone());
        sup.connect(direct_creds()).await.unwrap();
        sup.silent_reconnect().await.unwrap();
        assert_eq!(sup.status(), LinkStatus::Connected);
        assert_eq!(gateway.connect_calls(), 2);
        sup.disconnect().await;
    }

    #[tokio::test]
    async fn silent_reconnect_without_credentials_errors() {
        let gateway = Arc::new(FakeGateway::new());
        let (sup, _tunnel) = supervisor(gateway);
        let err = sup.silent_reconnect().await.unwrap_err();
        assert!(matches!(err, CoreError::NoCredentials));
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_events_are_republished_on_the_bus() {
        let gateway = Arc::new(FakeGateway::new());
        let (sup, _tunnel) = supervisor(gateway.clone());
        let mut bus_rx = sup.bus().subscribe();
        sup.connect(direct_creds()).await.unwrap();

        let tx = gateway.events_tx.lock().clone().unwrap();
        tx.send(EventFrame {
            event: "chat".to_string(),
            payload: Some(serde_json::json!({"state": "delta"})),
            seq: Some(3),
        })
        .await
        .unwrap();

        loop {
            match bus_rx.recv().await.unwrap() {
                Event::Gateway { event, seq, .. } => {
                    assert_eq!(event, "chat");
                    assert_eq!(seq, Some(3));
                    break;
                }
                _ => continue,
            }
        }
        sup.disconnect().await;
    }
}
