use biosensor_link::infrastructure::bluetooth::protocol;
use biosensor_link::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn service(mock: MockTransport) -> (SessionService<MockTransport>, Arc<MockTransport>) {
    service_with(mock, SessionConfig::default())
}

fn service_with(
    mock: MockTransport,
    config: SessionConfig,
) -> (SessionService<MockTransport>, Arc<MockTransport>) {
    let mock = Arc::new(mock);
    (SessionService::new(mock.clone(), config), mock)
}

/// `Connected` must always come with a live handle
async fn assert_consistent(service: &SessionService<MockTransport>, mock: &MockTransport, id: &SessionId) {
    let snapshot = service.snapshot(id).expect("session exists");
    if snapshot.status() == SessionStatus::Connected {
        let handle = snapshot.handle.expect("connected without a handle");
        assert!(mock.is_connected(&handle).await);
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_does_no_io() {
    let (service, mock) = service(MockTransport::with_target_device());
    let id = service.open_session();

    assert_eq!(service.connect(id).await, ConnectOutcome::Connected);
    assert_eq!(service.connect(id).await, ConnectOutcome::AlreadyConnected);
    assert_eq!(mock.discover_calls(), 1);
    assert_eq!(mock.connect_calls(), 1);
    assert_consistent(&service, &mock, &id).await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_without_session_is_idempotent() {
    let (service, mock) = service(MockTransport::with_target_device());
    let id = SessionId::new();

    for _ in 0..3 {
        assert_eq!(service.disconnect(id).await, DisconnectOutcome::NoActiveSession);
    }
    assert_eq!(mock.disconnect_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_is_not_found_within_bound() {
    let (service, mock) = service(MockTransport::new().with_device("11:22:33:44:55:66"));
    let id = service.open_session();

    let started = tokio::time::Instant::now();
    assert_eq!(service.connect(id).await, ConnectOutcome::DeviceNotFound);
    assert!(started.elapsed() <= Duration::from_secs(10));
    assert_eq!(mock.connect_calls(), 0);
    assert!(!service.registry().is_attached(&id));
    assert!(service.registry().attached_sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_measurement_captures_every_notification() {
    let payloads: Vec<Vec<u8>> = vec![
        vec![0x01, 0x00, 0x01, 0x01],
        vec![0x7f, 0xff],
        vec![0x00, 0x00, 0x00, 0x05, 0xab, 0xcd],
        vec![0x02, 0x02],
    ];
    let mock = MockTransport::with_target_device()
        .emit_after_write(9, payloads[0].clone())
        .emit_after_write(9, payloads[1].clone())
        .emit_after_write(20, payloads[2].clone())
        .emit_after_write(protocol::COMMAND_TABLE.len() - 1, payloads[3].clone());
    let (service, mock) = service(mock);
    let id = service.open_session();
    service.connect(id).await;

    let MeasurementOutcome::Success(buffer) = service.start_measurement(id).await else {
        panic!("measurement failed");
    };
    let expected: Vec<u16> = payloads
        .iter()
        .flat_map(|p| protocol::decode_samples(p))
        .collect();
    assert_eq!(buffer.as_slice(), expected.as_slice());
    assert_eq!(buffer.as_slice(), &[0x0100, 0x0101, 0x7fff, 0, 5, 0xabcd, 0x0202]);

    let writes = mock.writes();
    let table: Vec<Vec<u8>> = protocol::COMMAND_TABLE.iter().map(|c| c.to_vec()).collect();
    assert_eq!(&writes[..table.len()], table.as_slice());
    assert_eq!(writes.last().unwrap().as_slice(), &protocol::STOP_COMMAND);
    assert_consistent(&service, &mock, &id).await;
}

#[test]
fn test_decoding_reproduces_encoded_sequence() {
    let values: Vec<u16> = vec![0, 1, 255, 256, 4096, 40000, u16::MAX];
    let payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
    assert_eq!(protocol::decode_samples(&payload), values);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_write_ends_sequence() {
    let (service, mock) = service(MockTransport::with_target_device().reject_write(15));
    let id = service.open_session();
    service.connect(id).await;

    let outcome = service.start_measurement(id).await;
    assert!(matches!(
        outcome,
        MeasurementOutcome::ProtocolError(SessionError::WriteRejected { step: 15, .. })
    ));
    let writes = mock.writes();
    assert_eq!(writes.len(), 15);
    assert!(writes.iter().all(|w| w.as_slice() != &protocol::STOP_COMMAND[..]));

    // The session stays usable
    assert_eq!(service.connect(id).await, ConnectOutcome::AlreadyConnected);
}

#[tokio::test(start_paused = true)]
async fn test_measurement_without_connection() {
    let (service, _mock) = service(MockTransport::with_target_device());
    let id = service.open_session();
    assert_eq!(
        service.start_measurement(id).await,
        MeasurementOutcome::NoActiveSession
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_waits_for_running_measurement() {
    let (service, mock) = service(MockTransport::with_target_device());
    let id = service.open_session();
    service.connect(id).await;

    let checker = async {
        for _ in 0..400 {
            assert_consistent(&service, &mock, &id).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    let disconnect = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.disconnect(id).await
    };

    let (measured, disconnected, ()) =
        tokio::join!(service.start_measurement(id), disconnect, checker);

    assert!(measured.is_success());
    assert_eq!(disconnected, DisconnectOutcome::Disconnected);
    assert_eq!(mock.writes().last().unwrap().as_slice(), &protocol::STOP_COMMAND);
    assert_eq!(service.status(&id).status, SessionStatus::Disconnected);
    assert!(service.snapshot(&id).unwrap().handle.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_aborts_measurement_after_wait() {
    let config = SessionConfig {
        measurement_wait: Duration::from_secs(2),
        ..SessionConfig::default()
    };
    let (service, mock) = service_with(MockTransport::with_target_device(), config);
    let id = service.open_session();
    service.connect(id).await;

    let checker = async {
        for _ in 0..100 {
            assert_consistent(&service, &mock, &id).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    let disconnect = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.disconnect(id).await
    };

    let (measured, disconnected, ()) =
        tokio::join!(service.start_measurement(id), disconnect, checker);

    assert!(matches!(
        measured,
        MeasurementOutcome::ProtocolError(SessionError::ProtocolError(ref m)) if m.contains("aborted")
    ));
    assert_eq!(disconnected, DisconnectOutcome::Disconnected);
    assert!(mock
        .writes()
        .iter()
        .all(|w| w.as_slice() != &protocol::STOP_COMMAND[..]));
    assert_eq!(mock.live_links(), 0);
    assert_eq!(service.status(&id).status, SessionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_reconciles_silent_drop() {
    let (service, mock) = service(MockTransport::with_target_device());
    let id = service.open_session();
    service.connect(id).await;

    mock.drop_all_links();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let snapshot = service.snapshot(&id).unwrap();
    assert_eq!(snapshot.status(), SessionStatus::Disconnected);
    assert!(snapshot.handle.is_none());
    assert_eq!(service.disconnect(id).await, DisconnectOutcome::NoActiveSession);

    assert_eq!(service.connect(id).await, ConnectOutcome::Connected);
    assert_consistent(&service, &mock, &id).await;
}

#[tokio::test(start_paused = true)]
async fn test_failures_leave_session_retryable() {
    let (service, mock) = service(
        MockTransport::with_target_device().with_disconnect_delay(Duration::from_secs(30)),
    );
    let id = service.open_session();

    service.connect(id).await;
    assert_eq!(service.disconnect(id).await, DisconnectOutcome::DisconnectTimedOut);
    let status = service.status(&id);
    assert_eq!(status.status, SessionStatus::Disconnected);
    assert_eq!(status.color, StatusColor::Danger);

    assert_eq!(service.connect(id).await, ConnectOutcome::Connected);
    assert_consistent(&service, &mock, &id).await;
}
