use stan_gax::StanError;

/// Validates a channel name against the subject grammar in the broker's
/// external-interface contract: ASCII, dot-separated, non-empty tokens,
/// none of which is `*`, and the last of which is not `>`.
///
/// `>` and `*` are wildcard tokens in the transport's subscribe grammar;
/// a channel (publish target) name may never contain one.
pub fn validate_channel_name(name: &str) -> Result<(), StanError> {
    if name.is_empty() {
        return Err(StanError::invalid_subject("channel name must not be empty"));
    }
    let mut tokens = name.split('.').peekable();
    while let Some(token) = tokens.next() {
        if token.is_empty() {
            return Err(StanError::invalid_subject(format!(
                "channel name {name:?} has an empty token"
            )));
        }
        if !token.is_ascii() {
            return Err(StanError::invalid_subject(format!(
                "channel name {name:?} has a non-ascii token"
            )));
        }
        if token == "*" || token == ">" {
            return Err(StanError::invalid_subject(format!(
                "channel name {name:?} may not contain a wildcard token"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_dotted_names() {
        assert!(validate_channel_name("foo").is_ok());
        assert!(validate_channel_name("foo.bar.baz").is_ok());
    }

    #[test]
    fn rejects_empty_and_wildcard_tokens() {
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("foo..bar").is_err());
        assert!(validate_channel_name("foo.*").is_err());
        assert!(validate_channel_name("foo.>").is_err());
        assert!(validate_channel_name(">").is_err());
    }
}
