use crate::types::TextChunk;

/// 段落区切りのチャンク分割
///
/// 改行で段落に分け、空でない段落（前後の空白を除去）を順に詰めていく。
/// 段落を追加すると `max_chars` を超える場合は、その時点のバッファを
/// チャンクとして確定し、その段落から新しいバッファを始める。
///
/// 1段落だけで `max_chars` を超える場合も切らずに1チャンクにする
/// （文の途中で分割しない）。
///
/// チャンク内の段落は `\n` で連結する。文字数は `char` 単位で数える。
///
/// # Examples
///
/// ```
/// # use video_topics::chunker::chunk;
/// let chunks = chunk("primeiro\n\nsegundo\nterceiro", 17);
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].text, "primeiro\nsegundo");
/// assert_eq!(chunks[1].text, "terceiro");
/// ```
pub fn chunk(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0usize;

    for paragraph in paragraphs(text) {
        let paragraph_chars = paragraph.chars().count();
        let separator = if buffer.is_empty() { 0 } else { 1 };

        if !buffer.is_empty() && buffer_chars + separator + paragraph_chars > max_chars {
            chunks.push(TextChunk {
                index: chunks.len(),
                text: std::mem::take(&mut buffer),
            });
            buffer_chars = 0;
        }

        if !buffer.is_empty() {
            buffer.push('\n');
            buffer_chars += 1;
        }
        buffer.push_str(paragraph);
        buffer_chars += paragraph_chars;
    }

    if !buffer.is_empty() {
        chunks.push(TextChunk {
            index: chunks.len(),
            text: buffer,
        });
    }

    chunks
}

/// 空でない段落を前後の空白を除去して列挙
pub fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}
