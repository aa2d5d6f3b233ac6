/// 解析 `Range: bytes=<start>-<end?>`。
/// 任何不合格式的值回 None,由呼叫端退回整檔回應
pub fn parse(header: &str) -> Option<(u64, Option<u64>)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end = end.trim();
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}

/// 決定實際回傳區間 [start, end](含端點)。
/// end 省略 ⇒ start + chunk − 1;一律夾進 size − 1。
/// start 超出檔尾或區間顛倒 ⇒ None(416)
pub fn resolve(start: u64, end: Option<u64>, size: u64, chunk: u64) -> Option<(u64, u64)> {
    if size == 0 || start >= size {
        return None;
    }
    let end = end
        .unwrap_or_else(|| start.saturating_add(chunk - 1))
        .min(size - 1);
    (start <= end).then_some((start, end))
}
