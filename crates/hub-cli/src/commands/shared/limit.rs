/// Precedence: command flag, then global `--limit`, then the config default.
#[must_use]
pub fn effective_limit(local: Option<u32>, global: Option<u32>, fallback: u32) -> u32 {
    local.or(global).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::effective_limit;

    #[test]
    fn local_wins_then_global_then_fallback() {
        assert_eq!(effective_limit(Some(5), Some(10), 20), 5);
        assert_eq!(effective_limit(None, Some(10), 20), 10);
        assert_eq!(effective_limit(None, None, 20), 20);
    }
}
