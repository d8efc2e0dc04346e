use peg_sink::{Delivery, FallbackSink, LocalSink, RemoteSink, ResultArtifact, ResultSink, SinkError};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Answers a single HTTP request with `status` and returns the request body.
fn one_shot_server(status: &'static str, reply: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/save_peg_results.php", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);
        let mut length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
            reply.len()
        );
        reader.get_mut().write_all(response.as_bytes()).unwrap();
        String::from_utf8(body).unwrap()
    });
    (url, handle)
}

fn artifact() -> ResultArtifact {
    ResultArtifact {
        experiment_id: "exp_test42".into(),
        timestamp: "2024-01-01T00:00:00.000Z".into(),
        started_at: Some("2024-01-01T00:00:00.000Z".into()),
        environment_info: "integration".into(),
        randomized: true,
        repetitions: 2,
        trials: Vec::new(),
    }
}

#[test]
fn remote_success_posts_the_artifact() {
    let (url, server) = one_shot_server("200 OK", r#"{"status":"success"}"#);
    let dir = tempfile::tempdir().unwrap();
    let sink = FallbackSink::from_endpoint(Some(&url), LocalSink::new(dir.path())).unwrap();

    let delivery = sink.deliver(&artifact()).unwrap();
    assert_eq!(delivery, Delivery::Remote { endpoint: url });

    let posted: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
    assert_eq!(posted["experimentId"], "exp_test42");
    assert_eq!(posted["repetitions"], 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn server_error_message_is_surfaced() {
    let (url, server) = one_shot_server(
        "400 Bad Request",
        r#"{"status":"error","message":"Invalid experiment ID format."}"#,
    );
    let remote = RemoteSink::with_timeout(url, Duration::from_secs(5)).unwrap();
    let err = remote.deliver(&artifact()).unwrap_err();
    server.join().unwrap();
    match err {
        SinkError::Rejected { status, message, .. } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Invalid experiment ID format.");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unreachable_endpoint_falls_back_locally() {
    // Bind then drop to get a port nothing listens on.
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();
    let sink = FallbackSink::new(
        Some(Box::new(
            RemoteSink::with_timeout(format!("http://127.0.0.1:{port}/save"), Duration::from_secs(2)).unwrap(),
        )),
        LocalSink::new(dir.path()),
    );

    let delivery = sink.deliver(&artifact()).unwrap();
    assert!(delivery.notice().is_some());
    assert!(dir.path().join("experiment_data_exp_test42.json").is_file());
}
