//! End-to-end behavior of a transport against a scripted server.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use resp_mux::{
    CancelToken, Error, Frame, Operation, OperationError, ProfileOutcome, Profiler, Transport,
    TransportBuilder, TransportConfig, TransportState,
};
use resp_proto::{Request, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex, split};

fn connect(builder: TransportBuilder) -> (Transport, DuplexStream) {
    let (client, server) = duplex(64 * 1024);
    let (r, w) = split(client);
    (builder.spawn(r, w).unwrap(), server)
}

/// Read one request off the server side and return its arguments.
async fn next_request(server: &mut DuplexStream, buf: &mut BytesMut) -> Option<Vec<Bytes>> {
    loop {
        if let Ok((value, n)) = Value::parse(&buf[..]) {
            let _ = buf.split_to(n);
            let args = value
                .as_array()
                .expect("requests are arrays")
                .iter()
                .map(|v| Bytes::copy_from_slice(v.as_bytes().expect("bulk argument")))
                .collect();
            return Some(args);
        }
        if server.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    }
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    Value::bulk_string(data).encode_to(&mut out);
    out.to_vec()
}

/// Answer every `ECHO x` with `$x`, one reply per request, in order.
async fn echo_server(mut server: DuplexStream) {
    let mut buf = BytesMut::new();
    while let Some(args) = next_request(&mut server, &mut buf).await {
        let reply = bulk(args.get(1).map_or(&b""[..], |a| &a[..]));
        if server.write_all(&reply).await.is_err() {
            return;
        }
    }
}

async fn wait_closed(transport: &Transport) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !transport.is_closed() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("transport closes");
}

fn reply_bytes(frame: Frame) -> Vec<u8> {
    frame
        .reader()
        .read_bytes()
        .unwrap()
        .expect("non-null reply")
        .into_owned()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_get_their_own_replies() {
    let (transport, server) = connect(TransportBuilder::new());
    tokio::spawn(echo_server(server));

    let mut callers = Vec::new();
    for task in 0..32 {
        let transport = transport.clone();
        callers.push(tokio::spawn(async move {
            for round in 0..50 {
                let marker = format!("task-{task}-round-{round}");
                let frame = transport
                    .call(&Request::echo(marker.as_bytes()))
                    .await
                    .unwrap();
                assert_eq!(reply_bytes(frame), marker.as_bytes());
            }
        }));
    }
    for caller in callers {
        caller.await.unwrap();
    }
    assert_eq!(transport.pending(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipelined_sends_complete_in_write_order() {
    let (transport, server) = connect(TransportBuilder::new());
    tokio::spawn(echo_server(server));

    let mut ops = Vec::new();
    for i in 0..500 {
        let marker = i.to_string();
        let op = transport.send(&Request::echo(marker.as_bytes())).await;
        ops.push((marker, op.unwrap()));
    }
    for (marker, op) in ops {
        assert_eq!(reply_bytes(op.await.unwrap()), marker.as_bytes());
    }
}

#[tokio::test]
async fn push_between_replies_goes_to_handler() {
    let pushes = Arc::new(Mutex::new(Vec::new()));
    let builder = TransportBuilder::new().on_push({
        let pushes = Arc::clone(&pushes);
        move |frame: Frame| pushes.lock().push(frame.to_value().unwrap())
    });
    let (transport, mut server) = connect(builder);

    let first = transport.send(&Request::get(b"a")).await.unwrap();
    let second = transport.send(&Request::get(b"b")).await.unwrap();
    let mut buf = BytesMut::new();
    next_request(&mut server, &mut buf).await.unwrap();
    next_request(&mut server, &mut buf).await.unwrap();

    server.write_all(&bulk(b"A")).await.unwrap();
    server
        .write_all(b">3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n")
        .await
        .unwrap();
    server.write_all(&bulk(b"B")).await.unwrap();

    assert_eq!(reply_bytes(first.await.unwrap()), b"A");
    assert_eq!(reply_bytes(second.await.unwrap()), b"B");
    assert_eq!(
        *pushes.lock(),
        vec![Value::push(vec![
            Value::bulk_string(b"message"),
            Value::bulk_string(b"news"),
            Value::bulk_string(b"hello"),
        ])]
    );
}

#[tokio::test]
async fn canceled_reply_is_discarded_without_desync() {
    let (transport, mut server) = connect(TransportBuilder::new());

    let token = CancelToken::new();
    let canceled = transport
        .send_with(&Request::get(b"slow"), Some(token.clone()))
        .await
        .unwrap();
    let next = transport.send(&Request::get(b"fast")).await.unwrap();
    token.cancel();
    assert!(matches!(canceled.await, Err(OperationError::Canceled)));

    let mut buf = BytesMut::new();
    next_request(&mut server, &mut buf).await.unwrap();
    next_request(&mut server, &mut buf).await.unwrap();
    // The canceled request still owns the head of the queue.
    assert_eq!(transport.pending(), 2);

    server.write_all(&bulk(b"for slow")).await.unwrap();
    server.write_all(&bulk(b"for fast")).await.unwrap();

    assert_eq!(reply_bytes(next.await.unwrap()), b"for fast");
    assert_eq!(transport.pending(), 0);
    assert_eq!(transport.state(), TransportState::Running);
}

#[tokio::test]
async fn dropped_operation_reply_is_discarded() {
    let (transport, mut server) = connect(TransportBuilder::new());
    drop(transport.send(&Request::get(b"ignored")).await.unwrap());
    let kept = transport.send(&Request::get(b"kept")).await.unwrap();

    let mut buf = BytesMut::new();
    next_request(&mut server, &mut buf).await.unwrap();
    next_request(&mut server, &mut buf).await.unwrap();
    server.write_all(&bulk(b"1")).await.unwrap();
    server.write_all(&bulk(b"2")).await.unwrap();
    assert_eq!(reply_bytes(kept.await.unwrap()), b"2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_token_shared_by_many_tasks() {
    let (transport, mut server) = connect(TransportBuilder::new());
    let token = CancelToken::new();
    let spawn_callers = |n: usize| {
        (0..n)
            .map(|_| {
                let transport = transport.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    let op = transport
                        .send_with(&Request::get(b"k"), Some(token))
                        .await
                        .unwrap();
                    op.await
                })
            })
            .collect::<Vec<_>>()
    };
    let mut buf = BytesMut::new();

    // Answered before the token fires: every caller keeps its reply.
    let answered = spawn_callers(8);
    for _ in 0..8 {
        next_request(&mut server, &mut buf).await.unwrap();
        server.write_all(&bulk(b"v")).await.unwrap();
    }
    for caller in answered {
        assert_eq!(reply_bytes(caller.await.unwrap().unwrap()), b"v");
    }

    // Firing the token wakes every caller still waiting.
    let waiting = spawn_callers(8);
    for _ in 0..8 {
        next_request(&mut server, &mut buf).await.unwrap();
    }
    token.cancel();
    for caller in waiting {
        assert!(matches!(
            caller.await.unwrap(),
            Err(OperationError::Canceled)
        ));
    }
    for _ in 0..8 {
        server.write_all(&bulk(b"late")).await.unwrap();
    }
    let after = tokio::spawn({
        let transport = transport.clone();
        async move { transport.call(&Request::ping()).await }
    });
    next_request(&mut server, &mut buf).await.unwrap();
    server.write_all(b"+PONG\r\n").await.unwrap();
    assert_eq!(after.await.unwrap().unwrap().as_bytes(), b"+PONG\r\n");
    assert_eq!(transport.state(), TransportState::Running);
}

#[tokio::test]
async fn dropping_every_handle_lets_pending_replies_finish() {
    let (transport, mut server) = connect(TransportBuilder::new());
    let op = transport.send(&Request::get(b"k")).await.unwrap();
    drop(transport);

    let mut buf = BytesMut::new();
    next_request(&mut server, &mut buf).await.unwrap();
    server.write_all(&bulk(b"v")).await.unwrap();
    assert_eq!(reply_bytes(op.await.unwrap()), b"v");
    // The client side then shuts its write half.
    let eof = tokio::time::timeout(Duration::from_secs(5), next_request(&mut server, &mut buf));
    assert_eq!(eof.await.unwrap(), None);
}

#[tokio::test]
async fn timeout_cancels_and_late_reply_is_dropped() {
    let (transport, mut server) = connect(TransportBuilder::new());
    let slow = transport
        .send_timeout(&Request::get(b"slow"), Duration::from_millis(20))
        .await
        .unwrap();
    let mut buf = BytesMut::new();
    next_request(&mut server, &mut buf).await.unwrap();
    assert!(matches!(slow.await, Err(OperationError::Canceled)));

    server.write_all(&bulk(b"late")).await.unwrap();
    let after = tokio::spawn({
        let transport = transport.clone();
        async move { transport.call(&Request::ping()).await }
    });
    next_request(&mut server, &mut buf).await.unwrap();
    server.write_all(b"+PONG\r\n").await.unwrap();
    assert_eq!(after.await.unwrap().unwrap().as_bytes(), b"+PONG\r\n");
}

#[tokio::test]
async fn default_timeout_applies_to_plain_sends() {
    let config = TransportConfig {
        default_timeout: Some(Duration::from_millis(10)),
        ..Default::default()
    };
    let (transport, _server) = connect(TransportBuilder::new().config(config));
    let err = transport.call(&Request::ping()).await.unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[tokio::test]
async fn malformed_reply_faults_every_pending_operation() {
    let (transport, mut server) = connect(TransportBuilder::new());
    let ops = [
        transport.send(&Request::get(b"1")).await.unwrap(),
        transport.send(&Request::get(b"2")).await.unwrap(),
        transport.send(&Request::get(b"3")).await.unwrap(),
    ];
    let mut buf = BytesMut::new();
    for _ in 0..3 {
        next_request(&mut server, &mut buf).await.unwrap();
    }
    server.write_all(&bulk(b"one")).await.unwrap();
    server.write_all(b"?garbage\r\n").await.unwrap();

    let [first, second, third] = ops;
    assert_eq!(reply_bytes(first.await.unwrap()), b"one");
    for op in [second, third] {
        match op.await {
            Err(OperationError::Fault(Error::Protocol(_))) => {}
            other => panic!("expected protocol fault, got {other:?}"),
        }
    }
    wait_closed(&transport).await;
    assert!(matches!(
        transport.send(&Request::ping()).await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn end_of_stream_faults_pending_operations() {
    let (transport, mut server) = connect(TransportBuilder::new());
    let answered = transport.send(&Request::get(b"1")).await.unwrap();
    let orphaned = transport.send(&Request::get(b"2")).await.unwrap();
    let mut buf = BytesMut::new();
    next_request(&mut server, &mut buf).await.unwrap();
    next_request(&mut server, &mut buf).await.unwrap();
    // Reply to the first, then half of the second, then hang up.
    server.write_all(&bulk(b"ok")).await.unwrap();
    server.write_all(b"$10\r\nhal").await.unwrap();
    drop(server);

    assert_eq!(reply_bytes(answered.await.unwrap()), b"ok");
    assert!(matches!(
        orphaned.await,
        Err(OperationError::Fault(Error::UnexpectedEof))
    ));
    wait_closed(&transport).await;
    assert!(matches!(transport.fault(), Some(Error::UnexpectedEof)));
}

#[tokio::test]
async fn idle_peer_close_is_clean() {
    let (transport, server) = connect(TransportBuilder::new());
    drop(server);
    wait_closed(&transport).await;
    assert!(transport.fault().is_none());
}

#[tokio::test]
async fn reply_split_across_reads_pairs_once() {
    let (transport, mut server) = connect(TransportBuilder::new());
    let op = transport.send(&Request::cmd(b"LRANGE")).await.unwrap();
    let mut buf = BytesMut::new();
    next_request(&mut server, &mut buf).await.unwrap();

    let reply = b"*?\r\n$?\r\n;3\r\nabc\r\n;0\r\n:7\r\n.\r\n";
    for byte in reply {
        server.write_all(std::slice::from_ref(byte)).await.unwrap();
        tokio::task::yield_now().await;
    }
    assert_eq!(
        op.await.unwrap().to_value().unwrap(),
        Value::array(vec![Value::bulk_string(b"abc"), Value::integer(7)])
    );
}

#[tokio::test]
async fn unsent_operation_fails_fast() {
    let (op, _remote) = Operation::<Frame, Error>::new(None);
    let result = tokio::time::timeout(Duration::from_secs(1), op)
        .await
        .expect("does not hang");
    assert!(matches!(result, Err(OperationError::NotSent)));
}

#[tokio::test]
async fn profiler_records_outcomes() {
    let profiler = Profiler::new();
    let (transport, mut server) = connect(TransportBuilder::new().profiler(profiler.clone()));
    let ok = transport.send(&Request::get(b"k")).await.unwrap();
    let err = transport.send(&Request::incr(b"k")).await.unwrap();
    let mut buf = BytesMut::new();
    next_request(&mut server, &mut buf).await.unwrap();
    next_request(&mut server, &mut buf).await.unwrap();
    server.write_all(b"$1\r\nv\r\n-ERR not an integer\r\n").await.unwrap();
    ok.await.unwrap();
    assert!(err.await.unwrap().server_error().is_some());

    let records = profiler.drain();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0].command[..], b"GET");
    assert_eq!(records[0].outcome, ProfileOutcome::Reply);
    assert_eq!(&records[1].command[..], b"INCR");
    assert_eq!(records[1].outcome, ProfileOutcome::ServerError);
}
