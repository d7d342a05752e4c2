//! End-to-end tests driving downloads through the public manager API
//! against a local mock HTTP server.

#![allow(clippy::unwrap_used)]

mod support;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use download_agent::{
    AgentConfig, DownloadManager, DownloadProperty, DownloadState, ErrorCode, FixedProbe,
};
use support::socket_guard::should_skip_socket_bound_test;
use support::{mock_server, online_manager, runtime, test_context, wait_for_status};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ==================== Happy path ====================

#[test]
fn test_download_transfers_and_finalizes() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    let content = body(64 * 1024);
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/pkg/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
            .expect(1)
            .mount(&server),
    );

    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("file.bin");
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("{}/pkg/file.bin", server.uri()), &dest)
        .unwrap();

    manager.start_download(&id).unwrap();
    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Transferred);
    assert_eq!(status.bytes_total, content.len() as u64);
    assert_eq!(status.bytes_transferred, content.len() as u64);
    assert_eq!(status.error, None);

    manager.finalize_download(&id).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), content);
    assert_eq!(
        manager.get_status(&id).unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert!(manager.is_idle());
}

#[test]
fn test_empty_body_transfers_with_zero_bytes() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    rt.block_on(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server),
    );

    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("empty");
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("{}/empty", server.uri()), &dest)
        .unwrap();
    manager.start_download(&id).unwrap();

    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Transferred);
    assert_eq!(status.bytes_transferred, 0);
    assert!(dest.exists());
}

// ==================== Failures ====================

#[test]
fn test_origin_not_found_pauses_with_http_error() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    rt.block_on(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server),
    );

    let temp = TempDir::new().unwrap();
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("{}/missing", server.uri()), temp.path().join("x"))
        .unwrap();
    manager.start_download(&id).unwrap();

    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Paused);
    assert_eq!(status.error, Some(ErrorCode::HttpNotFound));
    assert_eq!(status.bytes_transferred, 0);

    // Abort cleans up the partially created file.
    manager.abort_download(&id).unwrap();
    assert!(!temp.path().join("x").exists());
}

#[test]
fn test_server_error_is_retried_until_success() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    rt.block_on(async {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body(1024)))
            .mount(&server)
            .await;
    });

    let temp = TempDir::new().unwrap();
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("{}/flaky", server.uri()), temp.path().join("f"))
        .unwrap();
    manager.start_download(&id).unwrap();

    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Transferred);
    assert_eq!(status.bytes_transferred, 1024);
    assert_eq!(rt.block_on(server.received_requests()).unwrap().len(), 3);
}

#[test]
fn test_no_progress_timeout_pauses_with_no_progress() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    rt.block_on(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server),
    );

    let temp = TempDir::new().unwrap();
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("{}/stuck", server.uri()), temp.path().join("s"))
        .unwrap();
    // One second is ten of the test's progress-check intervals.
    manager
        .set_property(&id, DownloadProperty::NoProgressTimeoutSeconds, "1")
        .unwrap();
    manager.start_download(&id).unwrap();

    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Paused);
    assert_eq!(status.error, Some(ErrorCode::NoProgress));
    assert_eq!(status.bytes_transferred, 0);
    assert!(rt.block_on(server.received_requests()).unwrap().len() > 1);

    // Nothing is retried once paused.
    thread::sleep(Duration::from_millis(100));
    let seen = rt.block_on(server.received_requests()).unwrap().len();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(rt.block_on(server.received_requests()).unwrap().len(), seen);
}

#[test]
fn test_existing_destination_fails_start() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("taken");
    std::fs::write(&dest, b"keep me").unwrap();

    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download("http://127.0.0.1:9/never", &dest)
        .unwrap();
    let err = manager.start_download(&id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);
    assert_eq!(
        manager.get_status(&id).unwrap().state,
        DownloadState::Created
    );
    assert_eq!(std::fs::read(&dest).unwrap(), b"keep me");
}

#[test]
fn test_start_without_uri_fails() {
    let temp = TempDir::new().unwrap();
    let manager = online_manager(AgentConfig::default());
    let id = manager.create_download("", temp.path().join("x")).unwrap();
    let err = manager.start_download(&id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NoUri);
}

// ==================== Network loss ====================

#[test]
fn test_network_loss_waits_then_resumes() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    rt.block_on(async {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body(2048)))
            .mount(&server)
            .await;
    });

    let probe = Arc::new(FixedProbe::new(false));
    let manager =
        DownloadManager::new(test_context(AgentConfig::default(), Arc::clone(&probe))).unwrap();
    let temp = TempDir::new().unwrap();
    let id = manager
        .create_download(&format!("{}/net", server.uri()), temp.path().join("n"))
        .unwrap();
    manager.start_download(&id).unwrap();

    let waiting = wait_for_status(&manager, &id, |s| s.state == DownloadState::Paused);
    assert_eq!(waiting.error, None);
    assert_eq!(waiting.extended_error, Some(ErrorCode::NoNetwork));
    assert!(waiting.is_transient_error());

    probe.set_connected(true);
    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Transferred);
    assert_eq!(status.bytes_transferred, 2048);
    assert_eq!(status.extended_error, None);
}

#[test]
fn test_explicit_pause_cancels_network_wait() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    rt.block_on(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server),
    );

    let probe = Arc::new(FixedProbe::new(false));
    let manager =
        DownloadManager::new(test_context(AgentConfig::default(), Arc::clone(&probe))).unwrap();
    let temp = TempDir::new().unwrap();
    let id = manager
        .create_download(&format!("{}/net", server.uri()), temp.path().join("n"))
        .unwrap();
    manager.start_download(&id).unwrap();
    wait_for_status(&manager, &id, |s| s.extended_error == Some(ErrorCode::NoNetwork));

    manager.pause_download(&id).unwrap();
    let status = manager.get_status(&id).unwrap();
    assert_eq!(status.state, DownloadState::Paused);
    assert_eq!(status.extended_error, None);

    // With the re-probe cancelled, connectivity returning changes nothing.
    probe.set_connected(true);
    thread::sleep(Duration::from_millis(300));
    assert_eq!(
        manager.get_status(&id).unwrap().state,
        DownloadState::Paused
    );
}

// ==================== Pause and resume ====================

/// Reads one request head from `stream`.
fn read_request(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if stream.read(&mut byte).unwrap() == 0 {
            break;
        }
        head.push(byte[0]);
    }
    String::from_utf8_lossy(&head).to_string()
}

#[test]
fn test_pause_and_resume_requests_remaining_range() {
    if should_skip_socket_bound_test() {
        return;
    }
    let content = body(1000);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (requests_tx, requests_rx) = mpsc::channel();

    let served = content.clone();
    let server = thread::spawn(move || {
        // First connection: full headers, 400 bytes, then silence.
        let (mut first, _) = listener.accept().unwrap();
        requests_tx.send(read_request(&mut first)).unwrap();
        write!(
            first,
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            served.len()
        )
        .unwrap();
        first.write_all(&served[..400]).unwrap();
        first.flush().unwrap();

        // Second connection: the remainder as a partial response.
        let (mut second, _) = listener.accept().unwrap();
        requests_tx.send(read_request(&mut second)).unwrap();
        write!(
            second,
            "HTTP/1.1 206 Partial Content\r\nContent-Length: 600\r\nContent-Range: bytes 400-999/1000\r\n\r\n"
        )
        .unwrap();
        second.write_all(&served[400..]).unwrap();
        second.flush().unwrap();
        drop(first);
    });

    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("resumed.bin");
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("http://{addr}/resumed.bin"), &dest)
        .unwrap();
    manager.start_download(&id).unwrap();

    wait_for_status(&manager, &id, |s| s.bytes_transferred == 400);
    manager.pause_download(&id).unwrap();
    let paused = manager.get_status(&id).unwrap();
    assert_eq!(paused.state, DownloadState::Paused);
    assert_eq!(paused.bytes_transferred, 400);
    assert_eq!(paused.bytes_total, 1000);
    assert_eq!(paused.error, None);

    manager.start_download(&id).unwrap();
    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Transferred);
    assert_eq!(status.bytes_transferred, 1000);
    server.join().unwrap();

    let first = requests_rx.recv().unwrap().to_ascii_lowercase();
    let second = requests_rx.recv().unwrap().to_ascii_lowercase();
    assert!(!first.contains("range:"));
    assert!(second.contains("range: bytes=400-999"), "{second}");

    manager.finalize_download(&id).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[test]
fn test_uri_change_while_paused_resumes_against_new_server() {
    let rt = runtime();
    let Some(failing) = mock_server(&rt) else {
        return;
    };
    let Some(healthy) = mock_server(&rt) else {
        return;
    };
    let content = body(4096);
    rt.block_on(async {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&failing)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
            .expect(1)
            .mount(&healthy)
            .await;
    });

    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("moved.bin");
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("{}/moved.bin", failing.uri()), &dest)
        .unwrap();
    manager.start_download(&id).unwrap();

    let deadline = std::time::Instant::now() + support::WAIT_LIMIT;
    while rt.block_on(failing.received_requests()).unwrap().len() < 3 {
        assert!(std::time::Instant::now() < deadline, "server never retried");
        thread::sleep(Duration::from_millis(20));
    }
    manager.pause_download(&id).unwrap();

    manager
        .set_property(&id, DownloadProperty::Uri, &format!("{}/moved.bin", healthy.uri()))
        .unwrap();
    manager.start_download(&id).unwrap();

    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Transferred);
    assert_eq!(status.bytes_transferred, content.len() as u64);
    assert_eq!(status.error, None);

    manager.finalize_download(&id).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[test]
fn test_local_path_change_while_paused_moves_partial_file() {
    if should_skip_socket_bound_test() {
        return;
    }
    let content = body(1000);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (requests_tx, requests_rx) = mpsc::channel();

    let served = content.clone();
    let server = thread::spawn(move || {
        let (mut first, _) = listener.accept().unwrap();
        requests_tx.send(read_request(&mut first)).unwrap();
        write!(
            first,
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
            served.len()
        )
        .unwrap();
        first.write_all(&served[..300]).unwrap();
        first.flush().unwrap();

        let (mut second, _) = listener.accept().unwrap();
        requests_tx.send(read_request(&mut second)).unwrap();
        write!(
            second,
            "HTTP/1.1 206 Partial Content\r\nContent-Length: 700\r\nContent-Range: bytes 300-999/1000\r\n\r\n"
        )
        .unwrap();
        second.write_all(&served[300..]).unwrap();
        second.flush().unwrap();
        drop(first);
    });

    let temp = TempDir::new().unwrap();
    let old_dest = temp.path().join("partial.bin");
    let new_dest = temp.path().join("renamed.bin");
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("http://{addr}/partial.bin"), &old_dest)
        .unwrap();
    manager.start_download(&id).unwrap();
    wait_for_status(&manager, &id, |s| s.bytes_transferred == 300);

    let err = manager
        .set_property(&id, DownloadProperty::LocalPath, &new_dest.display().to_string())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert!(old_dest.exists());

    manager.pause_download(&id).unwrap();
    manager
        .set_property(&id, DownloadProperty::LocalPath, &new_dest.display().to_string())
        .unwrap();
    assert!(!old_dest.exists());
    assert_eq!(std::fs::read(&new_dest).unwrap(), &content[..300]);

    manager.start_download(&id).unwrap();
    let status = wait_for_status(&manager, &id, |s| s.state == DownloadState::Transferred);
    assert_eq!(status.bytes_transferred, 1000);
    server.join().unwrap();

    requests_rx.recv().unwrap();
    let resumed = requests_rx.recv().unwrap().to_ascii_lowercase();
    assert!(resumed.contains("range: bytes=300-999"), "{resumed}");

    manager.finalize_download(&id).unwrap();
    assert!(!old_dest.exists());
    assert_eq!(std::fs::read(&new_dest).unwrap(), content);
}

// ==================== State and properties ====================

#[test]
fn test_finalize_before_transfer_is_invalid_state() {
    let rt = runtime();
    let Some(server) = mock_server(&rt) else {
        return;
    };
    rt.block_on(
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(body(16))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server),
    );

    let temp = TempDir::new().unwrap();
    let manager = online_manager(AgentConfig::default());
    let id = manager
        .create_download(&format!("{}/slow", server.uri()), temp.path().join("s"))
        .unwrap();
    manager.start_download(&id).unwrap();

    let err = manager.finalize_download(&id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert_eq!(
        manager.get_status(&id).unwrap().state,
        DownloadState::Transferring
    );

    // Uri is only writable while Created or Paused.
    let err = manager
        .set_property(&id, DownloadProperty::Uri, "http://example.com/other")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);

    manager.pause_download(&id).unwrap();
    manager
        .set_property(&id, DownloadProperty::Uri, &format!("{}/other", server.uri()))
        .unwrap();
    assert!(
        manager
            .get_property(&id, DownloadProperty::Uri)
            .unwrap()
            .ends_with("/other")
    );
}

#[test]
fn test_properties_round_trip_through_manager() {
    let temp = TempDir::new().unwrap();
    let manager = online_manager(AgentConfig::default());
    let id = manager.create_download("", temp.path().join("a")).unwrap();

    manager
        .set_property(&id, DownloadProperty::Uri, "http://example.com/a")
        .unwrap();
    let new_path = temp.path().join("b");
    manager
        .set_property(&id, DownloadProperty::LocalPath, &new_path.display().to_string())
        .unwrap();
    manager
        .set_property(&id, DownloadProperty::NoProgressTimeoutSeconds, "60")
        .unwrap();

    assert_eq!(
        manager.get_property(&id, DownloadProperty::Uri).unwrap(),
        "http://example.com/a"
    );
    assert_eq!(
        manager.get_property(&id, DownloadProperty::LocalPath).unwrap(),
        new_path.display().to_string()
    );
    assert_eq!(
        manager
            .get_property(&id, DownloadProperty::NoProgressTimeoutSeconds)
            .unwrap(),
        "60"
    );

    let err = manager
        .set_property(&id, DownloadProperty::Id, "other")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ReadOnlyProperty);
    let err = manager
        .set_property(&id, DownloadProperty::NoProgressTimeoutSeconds, "soon")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn test_concurrent_callers_see_consistent_registry() {
    let temp = TempDir::new().unwrap();
    let manager = Arc::new(online_manager(AgentConfig::default()));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let dest = temp.path().join(format!("f{i}"));
            thread::spawn(move || {
                let id = manager
                    .create_download("http://example.com/f", dest)
                    .unwrap();
                assert_eq!(
                    manager.get_status(&id).unwrap().state,
                    DownloadState::Created
                );
                id
            })
        })
        .collect();
    let mut ids: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(manager.download_ids().len(), 8);

    for id in &ids {
        manager.abort_download(id).unwrap();
    }
    assert!(manager.is_idle());
}
