use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tempfile::tempdir;

use nomad_sampler::{
    CollectConfig, Collector, NomadClient, OutputLayout, Provenance, RetryPolicy, emit_run,
};

fn read_body(stream: &mut TcpStream) -> String {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let read = stream.read(&mut buf).unwrap();
        if read == 0 {
            return String::new();
        }
        raw.extend_from_slice(&buf[..read]);
        let text = String::from_utf8_lossy(&raw).to_string();
        let Some(split) = text.find("\r\n\r\n") else {
            continue;
        };
        let content_length = text[..split]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if raw.len() >= split + 4 + content_length {
            return text[split + 4..].to_string();
        }
    }
}

fn serve(replies: Vec<(u16, String)>) -> (String, thread::JoinHandle<Vec<Value>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut requests = Vec::new();
        for (status, body) in replies {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_body(&mut stream);
            requests.push(serde_json::from_str(&request).unwrap_or(Value::Null));
            let head = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(body.as_bytes()).unwrap();
            let _ = stream.flush();
        }
        requests
    });
    (format!("http://{addr}/api/v1"), handle)
}

fn page(ids: &[(&str, &str)], next: Option<&str>) -> String {
    let data: Vec<Value> = ids
        .iter()
        .map(|(id, author)| json!({"entry_id": id, "main_author": {"name": author}}))
        .collect();
    json!({"data": data, "pagination": {"next_page_after_value": next}}).to_string()
}

#[test]
fn collects_over_http_with_retry_and_cursor_paging() {
    let (base_url, server) = serve(vec![
        (200, page(&[("e1", "A"), ("e2", "B")], Some("e2"))),
        (429, String::new()),
        (200, page(&[("e3", "C")], None)),
    ]);
    let config = CollectConfig {
        base_url,
        page_size: 2,
        max_authors_per_code: 10,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        },
        ..CollectConfig::default()
    };
    let dir = tempdir().unwrap();
    let layout = OutputLayout::new(dir.path());
    let codes = vec!["VASP".to_string()];

    let collector = Collector::new(NomadClient::new(&config), config.clone())
        .unwrap()
        .with_layout(layout.clone());
    let report = collector.collect(&codes);
    let run = emit_run(&layout, &config, &codes, &report, Utc::now()).unwrap();

    assert!(run.succeeded());
    assert_eq!(run.api_calls, 3);
    assert_eq!(run.total_picked_entries, 3);
    let picked = layout.load_selection("VASP").unwrap();
    let ids: Vec<&str> = picked.iter().map(|entry| entry.entry_id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2", "e3"]);
    assert!(picked.iter().all(|entry| entry.picked_by == Provenance::Scan));

    let requests = server.join().unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests[0]["pagination"].get("page_after_value").is_none());
    assert_eq!(requests[2]["pagination"]["page_after_value"], "e2");
    assert_eq!(
        requests[0]["query"]["results.method.simulation.program_name"],
        "VASP"
    );
    assert_eq!(requests[0]["owner"], "public");
}

#[test]
fn exhausted_retries_fail_the_code_without_panicking() {
    let (base_url, server) = serve(vec![(503, String::new()), (503, String::new())]);
    let config = CollectConfig {
        base_url,
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
        },
        ..CollectConfig::default()
    };
    let collector = Collector::new(NomadClient::new(&config), config.clone()).unwrap();
    let report = collector.collect(&["VASP".to_string()]);

    assert!(report.has_failures());
    assert_eq!(report.api_calls, 2);
    let (code, err) = report.failures().next().unwrap();
    assert_eq!(code, "VASP");
    assert!(err.to_string().contains("2 attempts"));
    server.join().unwrap();
}
