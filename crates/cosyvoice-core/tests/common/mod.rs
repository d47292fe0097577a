//! Mock synthesis server shared by the integration tests
#![allow(dead_code)]

use axum::{
    body::Body,
    extract::Form,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::Bytes;
use cosyvoice_core::StreamConfig;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const FRAME: usize = 3200;
pub const FAST_FRAMES: usize = 30;

/// Body written chunk by chunk, sleeping `delay` before each one
pub fn chunked(chunks: Vec<Vec<u8>>, delay: Duration) -> Response {
    let body = async_stream::stream! {
        for chunk in chunks {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            yield Ok::<_, Infallible>(Bytes::from(chunk));
        }
    };
    Body::from_stream(body).into_response()
}

pub fn router() -> Router {
    Router::new()
        // 9600 bytes in three 3200 byte chunks
        .route(
            "/a",
            post(|| async {
                chunked(
                    vec![vec![1u8; FRAME], vec![2u8; FRAME], vec![3u8; FRAME]],
                    Duration::ZERO,
                )
            }),
        )
        .route("/b", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/c",
            post(|| async { chunked(vec![(0u8..13).collect()], Duration::ZERO) }),
        )
        // Five chunks, slow enough to cancel in between
        .route(
            "/d",
            post(|| async { chunked(vec![vec![4u8; FRAME]; 5], Duration::from_millis(300)) }),
        )
        // Thirty frames at once, far ahead of a real-time device
        .route(
            "/fast",
            post(|| async { chunked(vec![vec![7u8; FRAME]; FAST_FRAMES], Duration::ZERO) }),
        )
        .route(
            "/echo",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                let text = form.get("tts_text").cloned().unwrap_or_default();
                let person = form.get("person").cloned().unwrap_or_default();
                format!("{}|{}", text, person)
            }),
        )
        .route(
            "/slow-headers",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                StatusCode::OK
            }),
        )
        // 100 bytes, then nothing for longer than the test read timeout
        .route(
            "/stall",
            post(|| async {
                let body = async_stream::stream! {
                    yield Ok::<_, Infallible>(Bytes::from(vec![5u8; 100]));
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    yield Ok::<_, Infallible>(Bytes::from(vec![6u8; 100]));
                };
                Body::from_stream(body).into_response()
            }),
        )
        // Irregular chunk sizes that never align with a frame
        .route(
            "/ragged",
            post(|| async {
                let sizes = [1usize, 13, 5000, 3199, 2, 7000, 385];
                let mut value = 0u8;
                let chunks = sizes
                    .iter()
                    .map(|&n| {
                        (0..n)
                            .map(|_| {
                                value = value.wrapping_add(1);
                                value
                            })
                            .collect()
                    })
                    .collect();
                chunked(chunks, Duration::from_millis(5))
            }),
        )
}

pub async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router()).await.unwrap();
    });
    addr
}

/// Server that promises 1000 bytes, sends 10 and hangs up
pub async fn spawn_truncating_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\n0123456789")
                .await;
            let _ = socket.shutdown().await;
        }
    });
    addr
}

pub fn config_for(addr: SocketAddr, path: &str) -> StreamConfig {
    StreamConfig {
        endpoint: format!("http://{}{}", addr, path),
        frame_size: FRAME,
        pre_roll_bytes: FRAME,
        drain_grace_ms: 10,
        ..StreamConfig::default()
    }
}
