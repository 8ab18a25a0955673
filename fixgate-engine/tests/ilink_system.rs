/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! End-to-end iLink3 scenarios against an in-process test exchange.

use bytes::BytesMut;
use fixgate_core::{ErrorEvent, LibraryId, SessionId, NOT_AWAITING_RETRANSMIT};
use fixgate_engine::{
    DisconnectReason, EngineConfiguration, GatewayEngine, GatewayLibrary, IlinkSessionHandle,
    LibraryConfiguration, ReplyState, SessionHandler,
};
use fixgate_sbe::messages::{
    Establish, EstablishmentAck, EstablishmentReject, KeepAliveLapsed, Negotiate, NegotiateReject,
    NegotiateResponse, NotApplied, RetransmitRequest, Sequence, Terminate,
};
use fixgate_sbe::{
    ilink_frame_length, template, BusinessHeader, ExecutionReportStatus, MessageHeader,
    NewOrderSingle,
};
use fixgate_session::ilink::{NewOrderParams, NotAppliedResponse};
use fixgate_session::SessionState;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const KEEP_ALIVE: Duration = Duration::from_millis(500);
const SESSION_ID: &str = "ABC";
const FIRM_ID: &str = "DEFGH";
const ACCESS_KEY_ID: &str = "12345678901234567890";
const IO_TIMEOUT: Duration = Duration::from_secs(5);
const RETRANSMIT_REJECT_REASON: &str = "out of range";
const RETRANSMIT_REJECT_ERROR_CODES: u16 = 4;

/// Records callbacks for assertions.
#[derive(Debug, Default)]
struct TestHandler {
    messages: Mutex<Vec<(u16, bool)>>,
    rejects: Mutex<Vec<(String, u16)>>,
    disconnects: AtomicUsize,
    not_applied_response: Mutex<Option<NotAppliedResponse>>,
}

impl SessionHandler for TestHandler {
    fn on_business_message(
        &self,
        _session_id: SessionId,
        template_id: u16,
        _data: &[u8],
        retransmitted: bool,
    ) {
        self.messages.lock().push((template_id, retransmitted));
    }

    fn on_retransmit_reject(&self, _session_id: SessionId, reason: &str, error_codes: u16) {
        self.rejects.lock().push((reason.to_string(), error_codes));
    }

    fn on_not_applied(
        &self,
        _session_id: SessionId,
        _from_seq_no: u64,
        _msg_count: u64,
    ) -> NotAppliedResponse {
        self.not_applied_response
            .lock()
            .unwrap_or(NotAppliedResponse::Gapfill)
    }

    fn on_disconnect(&self, _session_id: SessionId, _reason: &DisconnectReason) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// The exchange side of one connection.
struct TestServer {
    stream: TcpStream,
    buffer: BytesMut,
    uuid: u64,
    keep_alive_ms: u16,
}

impl TestServer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(IO_TIMEOUT, listener.accept())
            .await
            .expect("accept timed out")
            .expect("accept failed");
        Self {
            stream,
            buffer: BytesMut::with_capacity(8 * 1024),
            uuid: 0,
            keep_alive_ms: KEEP_ALIVE.as_millis() as u16,
        }
    }

    async fn read_frame(&mut self) -> BytesMut {
        loop {
            if let Some(len) = ilink_frame_length(&self.buffer, 64 * 1024).expect("bad frame") {
                return self.buffer.split_to(len);
            }
            let n = timeout(IO_TIMEOUT, self.stream.read_buf(&mut self.buffer))
                .await
                .expect("read timed out")
                .expect("read failed");
            assert!(n > 0, "peer disconnected while a frame was expected");
        }
    }

    /// Reads the next frame of `template_id`, skipping Sequence keepalives.
    async fn read_template(&mut self, template_id: u16) -> BytesMut {
        loop {
            let frame = self.read_frame().await;
            let header = MessageHeader::decode(&frame).unwrap();
            if header.template_id == template::SEQUENCE && template_id != template::SEQUENCE {
                continue;
            }
            assert_eq!(
                header.template_id, template_id,
                "unexpected template {}",
                header.template_id
            );
            return frame;
        }
    }

    async fn write(&mut self, frame: &[u8]) {
        timeout(IO_TIMEOUT, self.stream.write_all(frame))
            .await
            .expect("write timed out")
            .expect("write failed");
    }

    async fn read_negotiate(&mut self) {
        let frame = self.read_template(template::NEGOTIATE).await;
        let negotiate = Negotiate::decode(&frame[8..]).unwrap();
        assert_eq!(negotiate.session, SESSION_ID);
        assert_eq!(negotiate.firm, FIRM_ID);
        assert_eq!(negotiate.access_key_id, ACCESS_KEY_ID);
        self.uuid = negotiate.uuid;
    }

    async fn read_establish(&mut self, expected_next_seq_no: u32) {
        let frame = self.read_template(template::ESTABLISH).await;
        let establish = Establish::decode(&frame[8..]).unwrap();
        assert_eq!(establish.session, SESSION_ID);
        assert_eq!(establish.firm, FIRM_ID);
        assert_eq!(establish.next_seq_no, expected_next_seq_no);
        self.keep_alive_ms = establish.keep_alive_interval_ms;
        self.uuid = establish.uuid;
    }

    async fn write_negotiate_response(&mut self) {
        let mut frame = BytesMut::new();
        NegotiateResponse {
            uuid: self.uuid,
            request_timestamp: 0,
            previous_seq_no: 0,
            previous_uuid: 0,
        }
        .encode(&mut frame);
        self.write(&frame).await;
    }

    async fn write_negotiate_reject(&mut self) {
        let mut frame = BytesMut::new();
        NegotiateReject {
            reason: "bad credentials",
            uuid: self.uuid,
            request_timestamp: 0,
            error_codes: 2,
        }
        .encode(&mut frame)
        .unwrap();
        self.write(&frame).await;
    }

    async fn write_establishment_ack(&mut self, previous_seq_no: u32, previous_uuid: u64, next_seq_no: u32) {
        let mut frame = BytesMut::new();
        EstablishmentAck {
            uuid: self.uuid,
            request_timestamp: 0,
            next_seq_no,
            previous_seq_no,
            previous_uuid,
            keep_alive_interval_ms: self.keep_alive_ms,
        }
        .encode(&mut frame);
        self.write(&frame).await;
    }

    async fn write_establishment_reject(&mut self) {
        let mut frame = BytesMut::new();
        EstablishmentReject {
            reason: "no negotiation",
            uuid: self.uuid,
            request_timestamp: 0,
            next_seq_no: 1,
            error_codes: 7,
        }
        .encode(&mut frame)
        .unwrap();
        self.write(&frame).await;
    }

    async fn write_execution_report(&mut self, seq_num: u32, poss_retrans: bool) {
        let mut frame = BytesMut::new();
        ExecutionReportStatus {
            header: BusinessHeader {
                uuid: self.uuid,
                seq_num,
                poss_retrans,
            },
            cl_ord_id: "123",
            ord_status: b'0',
        }
        .encode(&mut frame)
        .unwrap();
        self.write(&frame).await;
    }

    async fn accept_retransmit_request(&mut self, expected_from: u32, expected_count: u16) {
        let frame = self.read_template(template::RETRANSMIT_REQUEST).await;
        let request = RetransmitRequest::decode(&frame[8..]).unwrap();
        assert_eq!(request.from_seq_no, expected_from);
        assert_eq!(request.msg_count, expected_count);
    }

    async fn reject_retransmit_request(&mut self, expected_from: u32, expected_count: u16) {
        self.accept_retransmit_request(expected_from, expected_count)
            .await;
        let mut frame = BytesMut::new();
        fixgate_sbe::RetransmitReject {
            reason: RETRANSMIT_REJECT_REASON,
            uuid: self.uuid,
            last_uuid: self.uuid,
            request_timestamp: 0,
            error_codes: RETRANSMIT_REJECT_ERROR_CODES,
        }
        .encode(&mut frame)
        .unwrap();
        self.write(&frame).await;
    }

    async fn write_sequence(&mut self, next_seq_no: u32, lapsed: KeepAliveLapsed) {
        let mut frame = BytesMut::new();
        Sequence {
            uuid: self.uuid,
            next_seq_no,
            keep_alive_lapsed: lapsed,
        }
        .encode(&mut frame);
        self.write(&frame).await;
    }

    async fn write_not_applied(&mut self, from_seq_no: u32, msg_count: u32) {
        let mut frame = BytesMut::new();
        NotApplied {
            uuid: self.uuid,
            from_seq_no,
            msg_count,
        }
        .encode(&mut frame);
        self.write(&frame).await;
    }

    async fn write_terminate(&mut self, uuid: u64) {
        let mut frame = BytesMut::new();
        Terminate {
            reason: "server terminate",
            uuid,
            request_timestamp: 0,
            error_codes: 0,
        }
        .encode(&mut frame)
        .unwrap();
        self.write(&frame).await;
    }

    async fn read_terminate(&mut self) {
        let frame = self.read_template(template::TERMINATE).await;
        Terminate::decode(&frame[8..]).unwrap();
    }

    async fn read_new_order_single(&mut self, expected_seq: u32) {
        let frame = self.read_template(template::NEW_ORDER_SINGLE).await;
        let order = NewOrderSingle::decode(&frame[8..]).unwrap();
        assert_eq!(order.header.seq_num, expected_seq);
    }

    async fn assert_disconnected(&mut self) {
        let deadline = Instant::now() + IO_TIMEOUT;
        loop {
            assert!(Instant::now() < deadline, "peer never disconnected");
            // drain any trailing frames until EOF
            match timeout(IO_TIMEOUT, self.stream.read_buf(&mut self.buffer)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return,
                Ok(Ok(_)) => {}
                Err(_) => panic!("peer never disconnected"),
            }
        }
    }
}

struct Fixture {
    _dir: TempDir,
    listener: TcpListener,
    address: SocketAddr,
    engine: GatewayEngine,
    library: GatewayLibrary,
    handler: Arc<TestHandler>,
    errors: Arc<Mutex<Vec<ErrorEvent>>>,
}

impl Fixture {
    async fn launch() -> Self {
        let dir = TempDir::new().unwrap();
        Self::launch_in(dir).await
    }

    async fn launch_in(dir: TempDir) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let errors: Arc<Mutex<Vec<ErrorEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let config = EngineConfiguration::new(dir.path())
            .with_reply_timeout(Duration::from_secs(5))
            .with_error_consumer(Arc::new(move |event: &ErrorEvent| {
                sink.lock().push(event.clone());
            }));
        let engine = GatewayEngine::launch(config).unwrap();

        let handler = Arc::new(TestHandler::default());
        let library = GatewayLibrary::connect(
            &engine,
            LibraryConfiguration::new(LibraryId(1)),
            Arc::clone(&handler) as Arc<dyn SessionHandler>,
        )
        .await
        .unwrap();

        Self {
            _dir: dir,
            listener,
            address,
            engine,
            library,
            handler,
            errors,
        }
    }

    fn session_config(&self) -> fixgate_session::IlinkSessionConfig {
        fixgate_session::IlinkSessionConfig::new(self.address, SESSION_ID, FIRM_ID)
            .with_access_key_id(ACCESS_KEY_ID)
            .with_user_key("somethingprivate")
            .with_keep_alive_interval(KEEP_ALIVE)
    }

    /// Runs the full handshake and returns the server plus the handle.
    async fn establish(&self) -> (TestServer, IlinkSessionHandle) {
        let reply = self.library.initiate_ilink(self.session_config()).unwrap();
        let mut server = TestServer::accept(&self.listener).await;

        server.read_negotiate().await;
        server.write_negotiate_response().await;
        server.read_establish(1).await;
        server.write_establishment_ack(0, 0, 1).await;

        assert_eq!(reply.await_done().await, ReplyState::Completed);
        let handle = reply.result_if_present().unwrap();
        assert_eq!(handle.state(), SessionState::Established);
        assert_eq!(handle.uuid().value(), server.uuid);
        (server, handle)
    }

    async fn terminate_and_disconnect(&self, server: &mut TestServer, handle: &IlinkSessionHandle) {
        handle.terminate("shutdown", 0).unwrap();
        server.read_terminate().await;
        server.write_terminate(server.uuid).await;
        server.assert_disconnected().await;
        wait_until(|| handle.state() == SessionState::Disconnected).await;
    }
}

fn order() -> NewOrderParams {
    NewOrderParams {
        cl_ord_id: "123".to_string(),
        side: fixgate_sbe::Side::Buy,
        order_qty: 1,
        price: 99_000_000_000,
        order_request_id: 1,
        party_details_list_req_id: 1,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + IO_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition never became true");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn establishes_connection_at_beginning_of_week() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}

#[tokio::test]
async fn provides_error_upon_connection_failure() {
    let fixture = Fixture::launch().await;

    // nothing listens on this port once the listener is dropped
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = dead.local_addr().unwrap();
    drop(dead);

    let config = fixgate_session::IlinkSessionConfig::new(address, SESSION_ID, FIRM_ID)
        .with_access_key_id(ACCESS_KEY_ID);
    let reply = fixture.library.initiate_ilink(config).unwrap();

    assert_eq!(reply.await_done().await, ReplyState::Errored);
    assert!(reply.error_message().unwrap().contains("UNABLE_TO_CONNECT"));

    fixture.engine.close().await;
}

#[tokio::test]
async fn resends_negotiate_and_establish_on_timeout() {
    let fixture = Fixture::launch().await;
    let reply = fixture.library.initiate_ilink(fixture.session_config()).unwrap();
    let mut server = TestServer::accept(&fixture.listener).await;

    // ignore the first Negotiate; a second arrives within a keepalive interval
    server.read_negotiate().await;
    server.read_negotiate().await;
    server.write_negotiate_response().await;

    server.read_establish(1).await;
    server.read_establish(1).await;
    server.write_establishment_ack(0, 0, 1).await;

    assert_eq!(reply.await_done().await, ReplyState::Completed);

    fixture.engine.close().await;
}

#[tokio::test]
async fn disconnects_if_negotiate_not_responded_to() {
    let fixture = Fixture::launch().await;
    let reply = fixture.library.initiate_ilink(fixture.session_config()).unwrap();
    let mut server = TestServer::accept(&fixture.listener).await;

    server.read_negotiate().await;
    server.read_negotiate().await;

    assert_eq!(reply.await_done().await, ReplyState::Errored);
    assert_eq!(
        reply.error_message().unwrap(),
        "session error: negotiate timed out after 2 attempts"
    );
    server.assert_disconnected().await;

    fixture.engine.close().await;
}

#[tokio::test]
async fn supports_negotiate_reject() {
    let fixture = Fixture::launch().await;
    let reply = fixture.library.initiate_ilink(fixture.session_config()).unwrap();
    let mut server = TestServer::accept(&fixture.listener).await;

    server.read_negotiate().await;
    server.write_negotiate_reject().await;

    assert_eq!(reply.await_done().await, ReplyState::Errored);
    assert!(reply.error_message().unwrap().contains("Negotiate rejected"));
    server.assert_disconnected().await;

    fixture.engine.close().await;
}

#[tokio::test]
async fn supports_establishment_reject() {
    let fixture = Fixture::launch().await;
    let reply = fixture.library.initiate_ilink(fixture.session_config()).unwrap();
    let mut server = TestServer::accept(&fixture.listener).await;

    server.read_negotiate().await;
    server.write_negotiate_response().await;
    server.read_establish(1).await;
    server.write_establishment_reject().await;

    assert_eq!(reply.await_done().await, ReplyState::Errored);
    assert!(reply
        .error_message()
        .unwrap()
        .contains("Establishment rejected"));
    server.assert_disconnected().await;

    fixture.engine.close().await;
}

#[tokio::test]
async fn exchanges_business_messages() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    handle.try_send_order(order()).unwrap();
    server.read_new_order_single(1).await;
    server.write_execution_report(1, false).await;

    wait_until(|| handle.next_recv_seq() == 2).await;
    wait_until(|| !fixture.handler.messages.lock().is_empty()).await;
    let messages = fixture.handler.messages.lock().clone();
    assert_eq!(messages, vec![(template::EXECUTION_REPORT_STATUS, false)]);

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}

#[tokio::test]
async fn requests_retransmit_for_sequence_number_gap() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    handle.try_send_order(order()).unwrap();
    server.read_new_order_single(1).await;

    server.write_execution_report(3, false).await;
    server.accept_retransmit_request(1, 2).await;

    server.write_execution_report(1, true).await;
    server.write_execution_report(4, false).await;
    server.write_execution_report(2, true).await;

    wait_until(|| handle.next_recv_seq() == 5).await;
    wait_until(|| handle.retransmit_fill_seq() == NOT_AWAITING_RETRANSMIT).await;

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}

#[tokio::test]
async fn only_has_a_single_retransmit_request_in_flight() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    server.write_execution_report(2, false).await;
    server.write_execution_report(4, false).await;

    server.accept_retransmit_request(1, 1).await;
    wait_until(|| handle.next_recv_seq() == 5).await;

    // the second request must not be in flight yet
    handle.try_send_order(order()).unwrap();
    server.read_new_order_single(1).await;
    assert_eq!(handle.retransmit_fill_seq(), 1);

    server.write_execution_report(1, true).await;
    server.accept_retransmit_request(3, 1).await;
    wait_until(|| handle.retransmit_fill_seq() == 3).await;

    server.write_execution_report(3, true).await;
    wait_until(|| handle.retransmit_fill_seq() == NOT_AWAITING_RETRANSMIT).await;
    assert_eq!(handle.next_recv_seq(), 5);

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}

#[tokio::test]
async fn limits_large_retransmit_requests_into_batches() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    server.write_execution_report(5000, false).await;

    server.accept_retransmit_request(1, 2500).await;
    for seq in 1..=2500 {
        server.write_execution_report(seq, true).await;
    }

    server.accept_retransmit_request(2501, 2499).await;
    for seq in 2501..5000 {
        server.write_execution_report(seq, true).await;
    }

    wait_until(|| handle.retransmit_fill_seq() == NOT_AWAITING_RETRANSMIT).await;
    wait_until(|| handle.next_recv_seq() == 5001).await;

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}

#[tokio::test]
async fn does_not_stall_upon_a_retransmit_reject() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    server.write_execution_report(5000, false).await;

    server.reject_retransmit_request(1, 2500).await;
    server.reject_retransmit_request(2501, 2499).await;

    wait_until(|| handle.retransmit_fill_seq() == NOT_AWAITING_RETRANSMIT).await;
    wait_until(|| handle.next_recv_seq() == 5001).await;
    assert_eq!(handle.state(), SessionState::Established);

    wait_until(|| fixture.handler.rejects.lock().len() == 2).await;
    for (reason, error_codes) in fixture.handler.rejects.lock().iter() {
        assert_eq!(reason, RETRANSMIT_REJECT_REASON);
        assert_eq!(*error_codes, RETRANSMIT_REJECT_ERROR_CODES);
    }

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}

#[tokio::test]
async fn terminates_a_low_sequence_number_business_message() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    server.write_execution_report(1, false).await;
    wait_until(|| handle.next_recv_seq() == 2).await;

    // the same sequence again, without the retransmit flag
    server.write_execution_report(1, false).await;

    server.read_terminate().await;
    server.write_terminate(server.uuid).await;
    server.assert_disconnected().await;

    fixture.engine.close().await;
}

#[tokio::test]
async fn terminates_a_low_sequence_number_sequence_message() {
    let fixture = Fixture::launch().await;
    let (mut server, _handle) = fixture.establish().await;

    server.write_execution_report(1, false).await;
    server.write_sequence(1, KeepAliveLapsed::NotLapsed).await;

    server.read_terminate().await;
    server.write_terminate(server.uuid).await;
    server.assert_disconnected().await;

    fixture.engine.close().await;
}

#[tokio::test]
async fn accepts_exchange_initiated_terminate() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    server.write_terminate(server.uuid).await;
    server.read_terminate().await;
    server.assert_disconnected().await;

    wait_until(|| handle.state() == SessionState::Disconnected).await;
    wait_until(|| fixture.handler.disconnects.load(Ordering::SeqCst) == 1).await;

    fixture.engine.close().await;
}

#[tokio::test]
async fn notifies_incorrect_uuid_on_exchange_initiated_terminate() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    server.write_terminate(0).await;
    server.read_terminate().await;
    server.assert_disconnected().await;

    wait_until(|| handle.state() == SessionState::Disconnected).await;
    wait_until(|| {
        fixture
            .errors
            .lock()
            .iter()
            .any(|e| e.description.contains("Invalid uuid=0"))
    })
    .await;

    fixture.engine.close().await;
}

#[tokio::test]
async fn supports_not_applied_gapfill() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;
    *fixture.handler.not_applied_response.lock() = Some(NotAppliedResponse::Gapfill);

    handle.try_send_order(order()).unwrap();
    server.read_new_order_single(1).await;
    server.write_not_applied(1, 1).await;

    // gap fill arrives as a Sequence carrying the next outbound number
    let frame = server.read_template(template::SEQUENCE).await;
    let sequence = Sequence::decode(&frame[8..]).unwrap();
    assert_eq!(sequence.next_seq_no, 2);

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}

#[tokio::test]
async fn supports_retransmit_in_response_to_not_applied() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;
    *fixture.handler.not_applied_response.lock() = Some(NotAppliedResponse::Retransmit);

    for seq in 1..=3 {
        handle.try_send_order(order()).unwrap();
        server.read_new_order_single(seq).await;
    }

    // pretend 1 and 2 never applied
    server.write_not_applied(1, 2).await;

    for seq in [1u32, 2] {
        let frame = server.read_template(template::NEW_ORDER_SINGLE).await;
        let replay = NewOrderSingle::decode(&frame[8..]).unwrap();
        assert_eq!(replay.header.seq_num, seq);
        assert!(replay.header.poss_retrans);
    }

    // reading both replays proves the response was processed, so the
    // next send is accepted again and takes the next fresh sequence
    handle.try_send_order(order()).unwrap();
    server.read_new_order_single(4).await;

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}

#[tokio::test]
async fn supports_reestablishing_connections_after_restart() {
    let dir = TempDir::new().unwrap();
    let last_uuid;
    {
        let fixture = Fixture::launch_in(dir).await;
        let (mut server, handle) = fixture.establish().await;

        handle.try_send_order(order()).unwrap();
        server.read_new_order_single(1).await;
        last_uuid = handle.uuid().value();

        fixture.terminate_and_disconnect(&mut server, &handle).await;
        fixture.engine.close().await;

        // relaunch over the same engine directory
        let restarted = Fixture::launch_in(fixture._dir).await;
        let config = restarted
            .session_config()
            .with_re_establish_last_session(true);
        let reply = restarted.library.initiate_ilink(config).unwrap();
        let mut server = TestServer::accept(&restarted.listener).await;

        // no negotiate: straight to establish with the previous uuid and
        // the persisted outbound sequence
        server.read_establish(2).await;
        assert_eq!(server.uuid, last_uuid);
        server.write_establishment_ack(1, last_uuid, 1).await;

        assert_eq!(reply.await_done().await, ReplyState::Completed);
        let handle = reply.result_if_present().unwrap();
        assert_eq!(handle.uuid().value(), last_uuid);
        assert_eq!(handle.next_sent_seq(), 2);

        restarted.terminate_and_disconnect(&mut server, &handle).await;
        restarted.engine.close().await;
    }
}

#[tokio::test]
async fn requests_retransmit_for_establish_gap() {
    let fixture = Fixture::launch().await;
    let (mut server, handle) = fixture.establish().await;

    handle.try_send_order(order()).unwrap();
    server.read_new_order_single(1).await;
    let last_uuid = handle.uuid().value();
    fixture.terminate_and_disconnect(&mut server, &handle).await;

    let config = fixture
        .session_config()
        .with_re_establish_last_session(true);
    let reply = fixture.library.initiate_ilink(config).unwrap();
    let mut server = TestServer::accept(&fixture.listener).await;

    server.read_establish(2).await;
    assert_eq!(server.uuid, last_uuid);
    // the exchange already sent message 1, which this side missed
    server.write_establishment_ack(1, last_uuid, 2).await;

    assert_eq!(reply.await_done().await, ReplyState::Completed);
    let handle = reply.result_if_present().unwrap();

    server.accept_retransmit_request(1, 1).await;
    wait_until(|| handle.next_recv_seq() == 2).await;

    server.write_execution_report(2, false).await;
    server.write_execution_report(1, true).await;

    wait_until(|| handle.next_recv_seq() == 3).await;
    wait_until(|| handle.retransmit_fill_seq() == NOT_AWAITING_RETRANSMIT).await;

    fixture.terminate_and_disconnect(&mut server, &handle).await;
    fixture.engine.close().await;
}
