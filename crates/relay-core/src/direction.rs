/// Author used for messages the relay itself writes into a conversation.
pub const SYSTEM_AUTHOR: &str = "system";

/// Decides whether a message author represents an inbound external sender.
pub trait DirectionPolicy: Send + Sync {
    fn is_inbound(&self, author: &str) -> bool;
}

/// Inbound when the author is non-empty, is not an email-style identity
/// and is not one of the reserved internal authors.
///
/// Phone-number authors are treated as external. This matches observed
/// provider behavior and has not been confirmed against its documentation.
#[derive(Clone, Debug)]
pub struct AuthorHeuristic {
    reserved: Vec<String>,
}

impl AuthorHeuristic {
    pub fn with_reserved<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reserved: reserved.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for AuthorHeuristic {
    fn default() -> Self {
        Self::with_reserved([SYSTEM_AUTHOR])
    }
}

impl DirectionPolicy for AuthorHeuristic {
    fn is_inbound(&self, author: &str) -> bool {
        let author = author.trim();
        !author.is_empty()
            && !author.contains('@')
            && !self.reserved.iter().any(|r| r.eq_ignore_ascii_case(author))
    }
}
