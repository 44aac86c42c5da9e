//! End-to-end dispatch scenarios driven through the `OverrideReceive` hook
//! seam with canned in-memory datagrams, so no real netlink traffic is
//! needed to exercise the engine's control-flow paths.

use std::{
    collections::VecDeque,
    sync::{Mutex, OnceLock},
};

use netlink_client::{
    engine, CallbackSet, Disposition, Event, HookSelector, NlAddr, NlCreds, NlError, NlMessage,
    NlmFlags, NlmsgHeader, RawDatagram, Socket, SocketOptions,
};

fn queue() -> &'static Mutex<VecDeque<RawDatagram>> {
    static QUEUE: OnceLock<Mutex<VecDeque<RawDatagram>>> = OnceLock::new();
    QUEUE.get_or_init(|| Mutex::new(VecDeque::new()))
}

/// Serializes tests since the canned-datagram queue and captured-creds slot
/// are process-wide statics (the hook function pointers can't close over
/// per-test state).
fn test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn push_datagram(bytes: Vec<u8>, from: NlAddr, creds: Option<NlCreds>) {
    queue().lock().expect("queue mutex poisoned").push_back(RawDatagram { bytes, from, creds });
}

fn canned_receive(_socket: &mut Socket) -> netlink_client::Result<Option<RawDatagram>> {
    Ok(queue().lock().expect("queue mutex poisoned").pop_front())
}

fn connect_test_socket() -> Socket {
    let mut socket =
        Socket::connect(libc::NETLINK_GENERIC, SocketOptions::new().peek(false)).expect(
            "opening an AF_NETLINK socket should not require elevated privileges",
        );
    socket.callbacks().override_receive(canned_receive);
    socket
}

fn record_bytes(nl_type: u16, flags: NlmFlags, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut msg = NlMessage::simple(nl_type, flags);
    msg.append(payload, netlink_client::ALIGN).unwrap();
    msg.put(0, seq, nl_type, 0, flags).unwrap();
    msg.as_bytes().to_vec()
}

fn error_record_bytes(seq: u32, code: i32, original: NlmsgHeader) -> Vec<u8> {
    let mut payload = code.to_ne_bytes().to_vec();
    payload.extend_from_slice(&original.to_bytes());
    record_bytes(2, NlmFlags::empty(), seq, &payload)
}

#[test]
fn empty_request_gets_acknowledged() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    let original = NlmsgHeader::simple(16, NlmFlags::REQUEST | NlmFlags::ACK);
    push_datagram(error_record_bytes(7, 0, original), NlAddr::kernel(), None);

    engine::wait_for_ack(&mut socket, 7).expect("zero-code ERROR record is a pure ack");
}

#[test]
fn ack_advances_the_next_expected_sequence() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    let before = socket.next_expected_sequence();
    let original = NlmsgHeader::simple(16, NlmFlags::REQUEST | NlmFlags::ACK);
    push_datagram(error_record_bytes(7, 0, original), NlAddr::kernel(), None);

    engine::wait_for_ack(&mut socket, 7).expect("zero-code ERROR record is a pure ack");
    assert_eq!(socket.next_expected_sequence(), before.wrapping_add(1));
}

#[test]
fn nonzero_error_code_aborts() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    let original = NlmsgHeader::simple(16, NlmFlags::REQUEST);
    push_datagram(error_record_bytes(3, -22, original), NlAddr::kernel(), None);

    let err = engine::wait_for_ack(&mut socket, 3).unwrap_err();
    let NlError::Sys(io_err) = err else { panic!("expected a translated Sys error, got {err:?}") };
    assert_eq!(io_err.raw_os_error(), Some(22));
}

#[test]
fn sequence_mismatch_is_rejected_by_default() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    let original = NlmsgHeader::simple(16, NlmFlags::REQUEST);
    push_datagram(error_record_bytes(99, 0, original), NlAddr::kernel(), None);

    let err = engine::wait_for_ack(&mut socket, 5).unwrap_err();
    assert!(matches!(err, NlError::SequenceMismatch { expected: 5, actual: 99 }));
}

#[test]
fn multipart_dump_runs_to_done() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    let mut bytes = record_bytes(100, NlmFlags::MULTI, 1, &[1, 2, 3, 4]);
    bytes.extend_from_slice(&record_bytes(3, NlmFlags::MULTI, 1, &[]));
    push_datagram(bytes, NlAddr::kernel(), None);

    let processed = engine::receive_many(&mut socket).expect("DONE terminates the dump cleanly");
    assert_eq!(processed, 2);
}

fn valid_counter() -> &'static Mutex<usize> {
    static COUNTER: OnceLock<Mutex<usize>> = OnceLock::new();
    COUNTER.get_or_init(|| Mutex::new(0))
}

fn count_valid_hook(_msg: &NlMessage, _arg: &netlink_client::HookArg) -> Disposition {
    *valid_counter().lock().expect("valid counter mutex poisoned") += 1;
    Disposition::Proceed
}

#[test]
fn dump_interrupted_latches_and_drains_to_done() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();
    *valid_counter().lock().expect("valid counter mutex poisoned") = 0;

    let mut socket = connect_test_socket();
    let callbacks = CallbackSet::allocate(netlink_client::Personality::Default);
    callbacks.set(Event::Valid, HookSelector::Custom(count_valid_hook), std::sync::Arc::new(()));
    socket.set_callbacks(callbacks);
    socket.callbacks().override_receive(canned_receive);

    // DUMP_INTR with no DUMP_INTR hook installed must not abort on the spot:
    // the following record and the terminating DONE still have to be read.
    let mut bytes = record_bytes(100, NlmFlags::DUMP_INTR, 1, &[]);
    bytes.extend_from_slice(&record_bytes(100, NlmFlags::empty(), 1, &[]));
    bytes.extend_from_slice(&record_bytes(3, NlmFlags::empty(), 1, &[]));
    push_datagram(bytes, NlAddr::kernel(), None);

    let err = engine::receive_many(&mut socket).unwrap_err();
    assert!(matches!(err, NlError::DumpInterrupted));

    let seen = *valid_counter().lock().expect("valid counter mutex poisoned");
    assert_eq!(seen, 2, "dispatch must keep reading past DUMP_INTR through to DONE");
}

#[test]
fn empty_queue_ends_the_dispatch_loop_cleanly() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    let processed = engine::receive_many(&mut socket).expect("no data queued is not an error");
    assert_eq!(processed, 0);
}

fn tolerant_invalid_hook(_msg: &NlMessage, _arg: &netlink_client::HookArg) -> Disposition {
    Disposition::Proceed
}

#[test]
fn custom_invalid_hook_tolerates_a_sequence_mismatch() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    let original = NlmsgHeader::simple(16, NlmFlags::REQUEST);
    push_datagram(error_record_bytes(99, 0, original), NlAddr::kernel(), None);

    let callbacks = CallbackSet::allocate(netlink_client::Personality::Default);
    callbacks.set(Event::Invalid, HookSelector::Custom(tolerant_invalid_hook), std::sync::Arc::new(()));
    socket.set_callbacks(callbacks);
    socket.callbacks().override_receive(canned_receive);

    engine::wait_for_ack(&mut socket, 5)
        .expect("a custom INVALID hook that returns Proceed should tolerate the mismatch");
}

fn logging_ack_hook(_msg: &NlMessage, _arg: &netlink_client::HookArg) -> Disposition {
    Disposition::Proceed
}

#[test]
fn wait_for_ack_terminates_despite_a_custom_ack_hook_that_proceeds() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    let callbacks = CallbackSet::allocate(netlink_client::Personality::Default);
    callbacks.set(Event::Ack, HookSelector::Custom(logging_ack_hook), std::sync::Arc::new(()));
    socket.set_callbacks(callbacks);
    socket.callbacks().override_receive(canned_receive);

    let original = NlmsgHeader::simple(16, NlmFlags::REQUEST | NlmFlags::ACK);
    push_datagram(error_record_bytes(9, 0, original), NlAddr::kernel(), None);

    engine::wait_for_ack(&mut socket, 9).expect(
        "wait_for_ack must terminate on the matching ack even with a Proceed-returning ACK hook",
    );
}

#[test]
fn pickup_copies_out_the_first_valid_record() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();

    let mut socket = connect_test_socket();
    push_datagram(record_bytes(100, NlmFlags::empty(), 1, &[7, 7, 7]), NlAddr::kernel(), None);

    let msg = engine::pickup(&mut socket).expect("one VALID record was queued");
    assert_eq!(msg.header().msg_type(), 100);
    assert_eq!(&msg.payload()[..3], &[7, 7, 7]);
}

fn captured_creds() -> &'static Mutex<Option<NlCreds>> {
    static CAPTURED: OnceLock<Mutex<Option<NlCreds>>> = OnceLock::new();
    CAPTURED.get_or_init(|| Mutex::new(None))
}

fn capture_creds_hook(msg: &NlMessage, _arg: &netlink_client::HookArg) -> Disposition {
    *captured_creds().lock().expect("captured-creds mutex poisoned") = msg.creds();
    Disposition::Stop
}

#[test]
fn credentials_survive_the_dispatch_loop() {
    let _guard = test_lock().lock().expect("test lock poisoned");
    queue().lock().expect("queue mutex poisoned").clear();
    *captured_creds().lock().expect("captured-creds mutex poisoned") = None;

    let mut socket = connect_test_socket();
    let creds = NlCreds { pid: 4242, uid: 1000, gid: 1000 };
    push_datagram(record_bytes(100, NlmFlags::empty(), 1, &[9, 9]), NlAddr::kernel(), Some(creds));

    let callbacks = CallbackSet::allocate(netlink_client::Personality::Default);
    callbacks.set(Event::Valid, HookSelector::Custom(capture_creds_hook), std::sync::Arc::new(()));
    socket.set_callbacks(callbacks);
    socket.callbacks().override_receive(canned_receive);

    engine::receive_many(&mut socket).expect("a single Valid record stopped via the hook");

    let got = *captured_creds().lock().expect("captured-creds mutex poisoned");
    assert_eq!(got, Some(creds));
}
