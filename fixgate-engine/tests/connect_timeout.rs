/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Connecting before the acceptor is up: initiate replies time out until
//! the peer engine exists, then a connection establishes and business
//! messages flow.

use fixgate_core::{CompId, LibraryId, SessionId};
use fixgate_engine::{
    EngineConfiguration, GatewayEngine, GatewayLibrary, LibraryConfiguration, ReplyState,
    SessionHandler,
};
use fixgate_session::{FixSessionConfig, SessionState};
use fixgate_transport::{ChannelSupplier, DebugChannelSupplier};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;

const INITIATOR_ID: &str = "initiator";
const ACCEPTOR_ID: &str = "acceptor";

#[derive(Debug, Default)]
struct RecordingHandler {
    messages: Mutex<Vec<(SessionId, u16)>>,
}

impl SessionHandler for RecordingHandler {
    fn on_business_message(
        &self,
        session_id: SessionId,
        template_id: u16,
        _data: &[u8],
        _retransmitted: bool,
    ) {
        self.messages.lock().push((session_id, template_id));
    }
}

async fn unused_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn session_config(address: SocketAddr, timeout: Duration) -> FixSessionConfig {
    FixSessionConfig::new(
        CompId::new(INITIATOR_ID).unwrap(),
        CompId::new(ACCEPTOR_ID).unwrap(),
    )
    .with_address(address)
    .with_heartbeat_interval(Duration::from_secs(2))
    .with_credentials("bob", "Uv1aegfLsae")
    .with_timeout(timeout)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn connects_once_system_is_up() {
    let initiating_dir = TempDir::new().unwrap();
    let accepting_dir = TempDir::new().unwrap();
    let port = unused_port().await;

    let supplier = Arc::new(DebugChannelSupplier::new());
    let factory_supplier = Arc::clone(&supplier);
    let initiating_config = EngineConfiguration::new(initiating_dir.path())
        .with_reply_timeout(Duration::from_secs(5))
        .with_channel_supplier_factory(Arc::new(move || {
            Arc::clone(&factory_supplier) as Arc<dyn ChannelSupplier>
        }));
    let initiating_engine = GatewayEngine::launch(initiating_config).unwrap();

    let initiating_handler = Arc::new(RecordingHandler::default());
    let initiating_library = GatewayLibrary::connect(
        &initiating_engine,
        LibraryConfiguration::new(LibraryId(1)),
        Arc::clone(&initiating_handler) as Arc<dyn SessionHandler>,
    )
    .await
    .unwrap();

    supplier.disable();

    // first initiate times out while nothing is listening
    let started = Instant::now();
    let first = initiating_library
        .initiate_fix(session_config(port, Duration::from_millis(200)))
        .unwrap();
    assert_eq!(first.await_done().await, ReplyState::TimedOut);
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "timeout observed late: {:?}",
        started.elapsed()
    );

    // and so does the second
    let second = initiating_library
        .initiate_fix(session_config(port, Duration::from_millis(200)))
        .unwrap();
    assert_eq!(second.await_done().await, ReplyState::TimedOut);

    supplier.enable();

    // launch the accepting engine on that port
    let accepting_config = EngineConfiguration::new(accepting_dir.path())
        .with_reply_timeout(Duration::from_secs(5))
        .with_bind_address(port);
    let accepting_engine = GatewayEngine::launch(accepting_config).unwrap();

    let accepting_handler = Arc::new(RecordingHandler::default());
    let _accepting_library = GatewayLibrary::connect(
        &accepting_engine,
        LibraryConfiguration::new(LibraryId(2)),
        Arc::clone(&accepting_handler) as Arc<dyn SessionHandler>,
    )
    .await
    .unwrap();

    // now it connects
    let third = initiating_library
        .initiate_fix(session_config(port, Duration::from_secs(5)))
        .unwrap();
    assert_eq!(third.await_done().await, ReplyState::Completed);
    let session = third.result_if_present().unwrap();
    assert_eq!(session.state(), SessionState::Established);
    assert_eq!(session.next_sent_seq(), 2);

    // first business exchange flows acceptor-ward
    session
        .try_send_app("D", vec![(11, "ORDER1".to_string()), (55, "ESZ9".to_string())])
        .unwrap();
    wait_until(|| !accepting_handler.messages.lock().is_empty()).await;
    let (_, msg_type) = accepting_handler.messages.lock()[0];
    assert_eq!(msg_type, u16::from(b'D'));

    session.initiate_logout().unwrap();
    wait_until(|| session.state() == SessionState::Disconnected).await;

    initiating_engine.close().await;
    accepting_engine.close().await;
}
