use super::*;

/// Rebuild the source text by dropping the repeated prefix of every chunk after the first
fn reassemble(chunks: &[String], overlap: usize) -> String {
    let mut text = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            text.push_str(chunk);
        } else {
            text.extend(chunk.chars().skip(overlap));
        }
    }
    text
}

#[test]
fn empty_text() {
    let chunks = chunk("", 500, 50).expect("chunk should succeed");
    assert!(chunks.is_empty());
}

#[test]
fn short_text_is_single_chunk() {
    let chunks = chunk("hello", 500, 50).expect("chunk should succeed");
    assert_eq!(chunks, vec!["hello".to_string()]);
}

#[test]
fn text_of_exactly_chunk_size() {
    let text = "a".repeat(500);
    let chunks = chunk(&text, 500, 50).expect("chunk should succeed");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0], text);
}

#[test]
fn windows_advance_by_stride() {
    let text: String = ('a'..='z').cycle().take(1000).collect();
    let chunks = chunk(&text, 500, 50).expect("chunk should succeed");

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].chars().count(), 500);
    assert_eq!(chunks[1].chars().count(), 500);
    assert_eq!(chunks[2].chars().count(), 100);

    // The last 50 characters of one chunk open the next one
    let tail: String = chunks[0].chars().skip(450).collect();
    assert!(chunks[1].starts_with(&tail));
}

#[test]
fn chunks_reassemble_into_source() {
    let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);

    for (size, overlap) in [(500, 50), (100, 0), (64, 63), (7, 3), (1, 0)] {
        let chunks = chunk(&text, size, overlap).expect("chunk should succeed");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chars().count() <= size));
        assert_eq!(
            reassemble(&chunks, overlap),
            text,
            "size {} overlap {}",
            size,
            overlap
        );
    }
}

#[test]
fn every_non_empty_length_produces_chunks() {
    for len in 1..=60 {
        let text = "x".repeat(len);
        let chunks = chunk(&text, 20, 5).expect("chunk should succeed");
        assert!(!chunks.is_empty(), "length {}", len);
        if len < 20 {
            assert_eq!(chunks.len(), 1);
        }
        assert_eq!(reassemble(&chunks, 5), text);
    }
}

#[test]
fn multibyte_characters_are_never_split() {
    let text = "héllo wörld 日本語のテキスト ✓ ".repeat(30);
    let chunks = chunk(&text, 17, 4).expect("chunk should succeed");

    assert!(chunks.iter().all(|c| c.chars().count() <= 17));
    assert_eq!(reassemble(&chunks, 4), text);
}

#[test]
fn splits_may_fall_mid_word() {
    let chunks = chunk("abcdefghij", 4, 1).expect("chunk should succeed");
    assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
}

#[test]
fn overlap_not_smaller_than_size_is_rejected() {
    assert!(matches!(
        chunk("some text", 50, 50),
        Err(RetrievalError::InvalidInput(_))
    ));
    assert!(matches!(
        chunk("some text", 10, 20),
        Err(RetrievalError::InvalidInput(_))
    ));
    assert!(matches!(
        chunk("some text", 0, 0),
        Err(RetrievalError::InvalidInput(_))
    ));
}

#[test]
fn config_defaults() {
    let config = ChunkingConfig::default();
    assert_eq!(config.chunk_size, 500);
    assert_eq!(config.overlap, 50);
    assert_eq!(config.stride(), 450);
    assert!(config.validate().is_ok());
}
