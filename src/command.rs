//! Parsing for `/price` commands in issue comments.

/// Result of scanning a comment body for a price command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceParse {
    /// The comment does not start with `/price`; not a command at all.
    NotCommand,
    /// `/price` was present but the amount was missing or not a
    /// non-negative integer. Treated as user error, silently skipped.
    Invalid {
        /// The offending token, empty when no amount was given.
        attempted: String,
    },
    /// A well-formed command with its amount.
    Price(u64),
}

/// Parse a comment body for a `/price <amount>` command.
///
/// The body must start with the literal token `/price` (no leading
/// whitespace, matching how the command is typed as the first thing in a
/// comment). The next whitespace-delimited token is the amount; anything
/// after it is ignored, so `/price 100 for this one` works.
///
/// Amounts must be non-negative integers: `abc`, `-5`, `1.5` are all
/// rejected as [`PriceParse::Invalid`].
pub fn parse_price_comment(body: &str) -> PriceParse {
    let mut tokens = body.split_whitespace();

    match tokens.next() {
        Some("/price") => {}
        _ => return PriceParse::NotCommand,
    }

    // A bare "/price\nrest" would pass the startswith check the naive way;
    // requiring the first token to be exactly "/price" also rejects
    // look-alikes such as "/prices".
    if !body.starts_with("/price") {
        return PriceParse::NotCommand;
    }

    match tokens.next() {
        None => PriceParse::Invalid {
            attempted: String::new(),
        },
        Some(token) => match token.parse::<u64>() {
            Ok(amount) => PriceParse::Price(amount),
            Err(_) => PriceParse::Invalid {
                attempted: token.to_string(),
            },
        },
    }
}
