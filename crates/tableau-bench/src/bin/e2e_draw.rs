//! End-to-end drawing benchmark for Tableau.
//!
//! Clients log in as guests, join one table and draw lines as fast as the
//! server accepts them. Every `addShape` is answered by an `updateShapes` to
//! each viewer, so the received count measures fan-out throughput.

use bytes::BytesMut;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tableau_core::{Brush, Gesture, GestureOutput, Pointer, Tool};
use tableau_protocol::ops::{client, server};
use tableau_protocol::{codec, Frame, Point, Shape};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(8);

    println!("Tableau end-to-end drawing benchmark");
    println!("Make sure the server is running: cargo run --release --bin tableau");
    println!();

    run_draw_benchmark(num_clients).await;
}

async fn run_draw_benchmark(num_clients: usize) {
    println!("Drawing benchmark: {} clients on one table", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let sent = Arc::new(AtomicU64::new(0));
    let updates = Arc::new(AtomicU64::new(0));
    let joined = Arc::new(Barrier::new(num_clients));
    let ready = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let counters = (Arc::clone(&sent), Arc::clone(&updates));
        let barriers = (Arc::clone(&joined), Arc::clone(&ready));
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, counters, barriers).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    ready.wait().await;
    println!("All {} clients at the table", num_clients);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    sent.store(0, Ordering::SeqCst);
    updates.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let shapes = sent.load(Ordering::SeqCst);
    let received = updates.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  Clients:            {:>10}", num_clients);
    println!("  Duration:           {:>10.2}s", elapsed);
    println!("  Shapes sent:        {:>10}", shapes);
    println!("  Shape rate:         {:>10.0} shapes/s", shapes as f64 / elapsed);
    println!("  Updates received:   {:>10}", received);
    println!("  Fan-out rate:       {:>10.0} updates/s", received as f64 / elapsed);

    for handle in handles {
        handle.abort();
    }
}

async fn send_call(
    sender: &mut SplitSink<Ws, Message>,
    op: &str,
    args: Vec<Value>,
) -> Result<(), BoxError> {
    let bytes = codec::encode(&Frame::call(op, args))?;
    sender.send(Message::Binary(bytes.to_vec())).await?;
    Ok(())
}

/// Read frames until a call to `op` arrives.
async fn wait_for(
    receiver: &mut SplitStream<Ws>,
    buf: &mut BytesMut,
    op: &str,
) -> Result<Vec<Value>, BoxError> {
    loop {
        while let Some(frame) = codec::decode_from(buf)? {
            if let Frame::Call { op: got, args } = frame {
                if got == op {
                    return Ok(args);
                }
            }
        }
        match receiver.next().await {
            Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err("connection closed".into()),
        }
    }
}

/// One line gesture per iteration, fed through the same state machine a
/// drawing client uses.
fn next_line(gesture: &mut Gesture, brush: &Brush, n: u64) -> Option<Shape> {
    let base = (n % 500) as f64;
    let input = [
        Pointer::Press(Point::new(base, base)),
        Pointer::Move(Point::new(base + 10.0, base + 5.0)),
        Pointer::Release(Point::new(base + 20.0, base + 10.0)),
    ];
    input
        .into_iter()
        .filter_map(|p| gesture.step(p, brush))
        .find_map(|out| match out {
            GestureOutput::Commit(geometry) => Some(Shape::new(0, geometry)),
            GestureOutput::Preview(_) => None,
        })
}

async fn run_client(
    client_id: usize,
    (sent, updates): (Arc<AtomicU64>, Arc<AtomicU64>),
    (joined, ready): (Arc<Barrier>, Arc<Barrier>),
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();
    let mut buf = BytesMut::with_capacity(65536);

    send_call(&mut sender, client::GUEST_LOGIN, vec![]).await?;
    wait_for(&mut receiver, &mut buf, server::LOGIN_OK).await?;

    if client_id == 0 {
        send_call(&mut sender, client::CREATE_TABLE, vec![json!(1920), json!(1080)]).await?;
        let args = wait_for(&mut receiver, &mut buf, server::CREATE_TABLE_OK).await?;
        println!("Table {} created", args.first().cloned().unwrap_or(Value::Null));
    }
    joined.wait().await;

    send_call(&mut sender, client::GET_DRAW, vec![json!(0)]).await?;
    wait_for(&mut receiver, &mut buf, server::RECEIVE_DRAW).await?;
    ready.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Binary(data) = message {
                buf.extend_from_slice(&data);
                while let Ok(Some(frame)) = codec::decode_from(&mut buf) {
                    if frame.op() == Some(server::UPDATE_SHAPES) {
                        updates.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    let brush = Brush {
        size: 2.0,
        color: format!("#{:06x}", client_id * 0x1f3d % 0xffffff),
        ..Brush::default()
    };
    let mut gesture = Gesture::new(Tool::Line);
    let mut n = 0u64;
    while let Some(shape) = next_line(&mut gesture, &brush, n) {
        if send_call(&mut sender, client::ADD_SHAPE, vec![serde_json::to_value(shape)?])
            .await
            .is_err()
        {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
        n += 1;
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
