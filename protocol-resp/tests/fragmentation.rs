//! Framing must not depend on how the bytes were split on the way in.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use resp_proto::{Cursor, ParseError, Reader, Scan, ScanState, Value};

fn text() -> impl Strategy<Value = Bytes> {
    "[a-zA-Z0-9 _:-]{0,16}".prop_map(Bytes::from)
}

fn blob() -> impl Strategy<Value = Bytes> {
    proptest::collection::vec(any::<u8>(), 0..48).prop_map(Bytes::from)
}

fn value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        text().prop_map(Value::SimpleString),
        text().prop_map(Value::Error),
        any::<i64>().prop_map(Value::Integer),
        blob().prop_map(Value::BulkString),
        Just(Value::Null),
        any::<bool>().prop_map(Value::Boolean),
        (-1.0e9f64..1.0e9).prop_map(Value::Double),
        "-?[1-9][0-9]{0,40}".prop_map(|s| Value::BigNumber(Bytes::from(s))),
        blob().prop_map(Value::BulkError),
        blob().prop_map(|data| Value::VerbatimString {
            format: *b"txt",
            data
        }),
    ];
    leaf.prop_recursive(4, 64, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Set),
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Push),
            proptest::collection::vec((inner.clone(), inner.clone()), 0..4).prop_map(Value::Map),
            (
                proptest::collection::vec((inner.clone(), inner.clone()), 0..2),
                inner
            )
                .prop_map(|(attrs, v)| Value::attribute(attrs, v)),
        ]
    })
}

fn encode(value: &Value) -> Vec<u8> {
    let mut out = BytesMut::new();
    value.encode_to(&mut out);
    out.to_vec()
}

/// Split `wire` at the given (unsorted, possibly repeated) cut points.
fn split(wire: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (wire.len() + 1)).collect();
    points.push(0);
    points.push(wire.len());
    points.sort_unstable();
    points.dedup();
    points.windows(2).map(|w| wire[w[0]..w[1]].to_vec()).collect()
}

/// Feed chunks into one growing buffer, presenting the frame start each time.
fn feed_contiguous(chunks: &[Vec<u8>]) -> Result<(Value, usize), ParseError> {
    let mut state = ScanState::new();
    let mut buf = Vec::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk);
        let mut cursor = Cursor::new(&buf);
        if let Scan::Complete(n) = state.scan(&mut cursor)? {
            let value = Reader::new(&buf[..n]).to_value()?;
            return Ok((value, n));
        }
    }
    Err(ParseError::Incomplete)
}

/// Keep every chunk as its own segment; nothing is concatenated.
fn feed_segmented(chunks: &[Vec<u8>]) -> Result<(Value, usize), ParseError> {
    let mut state = ScanState::new();
    for received in 1..=chunks.len() {
        let segments: Vec<&[u8]> = chunks[..received].iter().map(Vec::as_slice).collect();
        let start = Cursor::segmented(&segments);
        let mut cursor = start;
        if let Scan::Complete(n) = state.scan(&mut cursor)? {
            let value = Reader::from_cursor(start).to_value()?;
            return Ok((value, n));
        }
    }
    Err(ParseError::Incomplete)
}

proptest! {
    #[test]
    fn random_splits_match_whole(v in value(), cuts in proptest::collection::vec(any::<usize>(), 0..12)) {
        let wire = encode(&v);
        let whole = Value::parse(&wire).unwrap();
        prop_assert_eq!(&whole.0, &v);
        prop_assert_eq!(whole.1, wire.len());

        let chunks = split(&wire, &cuts);
        prop_assert_eq!(feed_contiguous(&chunks).unwrap(), whole.clone());
        prop_assert_eq!(feed_segmented(&chunks).unwrap(), whole);
    }

    #[test]
    fn byte_at_a_time_matches_whole(v in value()) {
        let wire = encode(&v);
        let chunks: Vec<Vec<u8>> = wire.iter().map(|b| vec![*b]).collect();
        let (parsed, n) = feed_contiguous(&chunks).unwrap();
        prop_assert_eq!(parsed, v.clone());
        prop_assert_eq!(n, wire.len());
        let (parsed, n) = feed_segmented(&chunks).unwrap();
        prop_assert_eq!(parsed, v);
        prop_assert_eq!(n, wire.len());
    }

    #[test]
    fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
        let mut state = ScanState::new();
        let _ = state.scan(&mut Cursor::new(&data));
        let _ = Value::parse(&data);
    }
}

#[test]
fn every_split_of_streaming_frame() {
    let wire: &[u8] = b"*?\r\n$?\r\n;3\r\nfoo\r\n;2\r\nba\r\n;0\r\n%?\r\n+k\r\n|1\r\n+a\r\n+b\r\n:1\r\n.\r\n>1\r\n_\r\n.\r\n";
    let expected = Value::parse(wire).unwrap();
    assert_eq!(expected.1, wire.len());
    for i in 0..=wire.len() {
        for j in i..=wire.len() {
            let chunks = vec![wire[..i].to_vec(), wire[i..j].to_vec(), wire[j..].to_vec()];
            assert_eq!(feed_contiguous(&chunks).unwrap(), expected, "split at {i}/{j}");
            assert_eq!(feed_segmented(&chunks).unwrap(), expected, "split at {i}/{j}");
        }
    }
}

#[test]
fn trailing_frame_is_left_for_next_scan() {
    let wire: &[u8] = b"+first\r\n:2\r\n";
    let mut state = ScanState::new();
    let mut cursor = Cursor::new(wire);
    assert_eq!(state.scan(&mut cursor), Ok(Scan::Complete(8)));
    assert_eq!(state.scan(&mut cursor), Ok(Scan::Complete(4)));
    assert!(cursor.is_empty());
}
