//! Chunker (C2): splits file contents into line-bounded regions, preferring
//! language-aware boundaries over a blind sliding window.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

pub const MAX_CHUNK_LINES: usize = 150;
pub const OVERLAP_LINES: usize = 5;
pub const MIN_CHUNK_LINES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub content: String,
    /// 1-based, inclusive.
    pub line_start: usize,
    /// 1-based, inclusive.
    pub line_end: usize,
}

/// SHA-256 of whole-file content, hex-encoded. Computed once per reconcile
/// and recorded on every chunk produced from that file.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

static RE_TS_JS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?(?:default\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?type\s+(\w+)\s*=").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?enum\s+(\w+)").unwrap(),
    ]
});

static RE_PY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:async\s+)?def\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^class\s+(\w+)").unwrap(),
    ]
});

static RE_JAVA: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:abstract\s+)?(?:final\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*(?:public|private|protected)?\s*interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*(?:public|private|protected)?\s*enum\s+(\w+)").unwrap(),
    ]
});

static RE_GO: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^func\s+(?:\([^)]+\)\s+)?(\w+)").unwrap(),
        Regex::new(r"(?m)^type\s+(\w+)\s+(?:struct|interface)").unwrap(),
    ]
});

static RE_RUST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?(?:async\s+)?fn\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?struct\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?enum\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?trait\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w:]+\))?\s+)?type\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^impl(?:<[^>]*>)?\s+(\w+)").unwrap(),
    ]
});

static RE_RUBY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*def\s+(?:self\.)?(\w+[?!]?)").unwrap(),
        Regex::new(r"(?m)^\s*class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*module\s+(\w+)").unwrap(),
    ]
});

static RE_PHP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*(?:public|private|protected)?\s*(?:static\s+)?function\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*(?:abstract\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*trait\s+(\w+)").unwrap(),
    ]
});

static RE_C_CPP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:static\s+)?(?:inline\s+)?(?:virtual\s+)?[\w:*&<>]+\s+(\w+)\s*\([^;]*\)\s*\{?\s*$").unwrap(),
        Regex::new(r"(?m)^(?:class|struct)\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^enum\s+(?:class\s+)?(\w+)").unwrap(),
        Regex::new(r"(?m)^namespace\s+(\w+)").unwrap(),
    ]
});

fn boundary_regexes(ext: &str) -> Option<&'static [Regex]> {
    let regexes: &'static [Regex] = match ext {
        "ts" | "tsx" | "js" | "jsx" => &RE_TS_JS,
        "py" => &RE_PY,
        "java" => &RE_JAVA,
        "go" => &RE_GO,
        "rs" => &RE_RUST,
        "rb" => &RE_RUBY,
        "php" => &RE_PHP,
        "c" | "cpp" | "h" => &RE_C_CPP,
        _ => return None,
    };
    Some(regexes)
}

/// Detect 0-based boundary line indices for `lines` using the regex family
/// for `ext`. Line 0 is always a boundary. A match adds its line index as
/// a boundary only if it differs from the last recorded boundary.
fn detect_boundaries(lines: &[&str], ext: &str) -> Vec<usize> {
    let mut boundaries = vec![0usize];
    let Some(regexes) = boundary_regexes(ext) else {
        return boundaries;
    };
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            continue;
        }
        if regexes.iter().any(|re| re.is_match(line)) {
            if boundaries.last() != Some(&i) {
                boundaries.push(i);
            }
        }
    }
    boundaries
}

/// Slide a window of `max_chars` lines with stride `max_lines - overlap`,
/// producing 1-based inclusive line ranges relative to `lines`. The final
/// chunk that reaches the last line is never dropped, even if short,
/// when it is the only chunk produced.
fn line_window_chunks(lines: &[&str], max_lines: usize, overlap: usize, min_lines: usize) -> Vec<RawChunk> {
    if lines.is_empty() {
        return Vec::new();
    }
    let step = max_lines.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_lines).min(lines.len());
        let len = end - start;
        let is_last = end == lines.len();
        if len >= min_lines || (is_last && chunks.is_empty()) {
            chunks.push(RawChunk {
                content: lines[start..end].join("\n"),
                line_start: start + 1,
                line_end: end,
            });
        }
        if is_last {
            break;
        }
        start += step;
    }
    chunks
}

/// Chunk `content` from a file at `filepath`, whose extension selects the
/// boundary-regex family.
pub fn chunk(content: &str, filepath: &str) -> Vec<RawChunk> {
    chunk_with_params(content, filepath, MAX_CHUNK_LINES, OVERLAP_LINES, MIN_CHUNK_LINES)
}

pub fn chunk_with_params(
    content: &str,
    filepath: &str,
    max_lines: usize,
    overlap: usize,
    min_lines: usize,
) -> Vec<RawChunk> {
    let lines: Vec<&str> = content.split('\n').collect();
    let total_lines = lines.len();

    if total_lines <= max_lines {
        return vec![RawChunk {
            content: content.to_string(),
            line_start: 1,
            line_end: total_lines,
        }];
    }

    let ext = std::path::Path::new(filepath)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut boundaries = detect_boundaries(&lines, &ext);
    boundaries.push(total_lines);
    boundaries.dedup();

    let mut chunks = Vec::new();
    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        let slice_len = end - start;
        if slice_len == 0 {
            continue;
        }
        if slice_len > max_lines {
            let sub = line_window_chunks(&lines[start..end], max_lines, overlap, min_lines);
            for c in sub {
                chunks.push(RawChunk {
                    content: c.content,
                    line_start: start + c.line_start,
                    line_end: start + c.line_end,
                });
            }
        } else if slice_len >= min_lines {
            chunks.push(RawChunk {
                content: lines[start..end].join("\n"),
                line_start: start + 1,
                line_end: end,
            });
        }
        // else: shorter than min_lines — dropped.
    }

    if chunks.is_empty() {
        return line_window_chunks(&lines, max_lines, overlap, min_lines);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn small_file_is_single_chunk() {
        let content = "def f():\n    return 1\n\n\n\n\n\n\n\n";
        let chunks = chunk(content, "a.py");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_start, 1);
    }

    #[test]
    fn exactly_max_lines_is_single_chunk() {
        let content = lines_of(MAX_CHUNK_LINES);
        let chunks = chunk(&content, "a.txt");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[0].line_end, MAX_CHUNK_LINES);
    }

    #[test]
    fn one_over_max_with_no_boundaries_overlaps() {
        let content = lines_of(MAX_CHUNK_LINES + 1);
        let chunks = chunk(&content, "a.txt");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[0].line_end, MAX_CHUNK_LINES);
        // Second chunk overlaps the first by OVERLAP_LINES.
        assert_eq!(chunks[1].line_start, MAX_CHUNK_LINES - OVERLAP_LINES + 1);
        assert_eq!(chunks[1].line_end, MAX_CHUNK_LINES + 1);
    }

    #[test]
    fn line_ranges_cover_whole_file() {
        let content = lines_of(400);
        let chunks = chunk(&content, "a.txt");
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks.last().unwrap().line_end, 400);
        for pair in chunks.windows(2) {
            assert!(pair[1].line_start <= pair[0].line_end + 1);
        }
    }

    #[test]
    fn boundary_driven_chunking_for_rust_functions() {
        let mut body = String::new();
        for i in 0..5 {
            body.push_str(&format!("pub fn f{i}() {{\n"));
            for _ in 0..40 {
                body.push_str("    do_work();\n");
            }
            body.push_str("}\n");
        }
        let chunks = chunk(&body, "a.rs");
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks.last().unwrap().line_end, body.split('\n').count());
    }

    #[test]
    fn hash_is_stable() {
        let a = hash_content("hello world");
        let b = hash_content("hello world");
        assert_eq!(a, b);
        assert_ne!(a, hash_content("hello worlds"));
    }

    proptest::proptest! {
        #[test]
        fn hash_content_is_deterministic(s in ".{0,500}") {
            proptest::prop_assert_eq!(hash_content(&s), hash_content(&s));
        }

        #[test]
        fn chunks_cover_file_without_gaps(n in 1usize..600) {
            let content = lines_of(n);
            let chunks = chunk(&content, "a.txt");
            proptest::prop_assert!(!chunks.is_empty());
            proptest::prop_assert_eq!(chunks[0].line_start, 1);
            proptest::prop_assert_eq!(chunks.last().unwrap().line_end, n);
            for pair in chunks.windows(2) {
                proptest::prop_assert!(pair[1].line_start <= pair[0].line_end + 1);
                proptest::prop_assert!(pair[0].line_start <= pair[0].line_end);
            }
        }
    }
}
