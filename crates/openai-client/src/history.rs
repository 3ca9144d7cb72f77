use crate::proto::Message;

/// The conversation sent along with each request.
///
/// Only completed exchanges are kept. When the history grows beyond the
/// budget, the oldest exchanges are dropped first.
#[derive(Debug)]
pub struct History {
    system_prompt: String,
    exchanges: Vec<(String, String)>,
    budget: usize,
}

impl History {
    pub fn new(system_prompt: String, budget: usize) -> Self {
        Self {
            system_prompt,
            exchanges: vec![],
            budget,
        }
    }

    /// Returns the messages for a request asking `text`.
    pub fn messages_for(&self, text: &str) -> Vec<Message> {
        let mut used = estimate_tokens(&self.system_prompt) + estimate_tokens(text);
        let kept = self
            .exchanges
            .iter()
            .rev()
            .take_while(|(user, assistant)| {
                used += estimate_tokens(user) + estimate_tokens(assistant);
                used <= self.budget
            })
            .count();

        let mut messages = Vec::with_capacity(kept * 2 + 2);
        messages.push(Message::System {
            content: self.system_prompt.clone(),
        });
        for (user, assistant) in &self.exchanges[self.exchanges.len() - kept..] {
            messages.push(Message::User {
                content: user.clone(),
            });
            messages.push(Message::Assistant {
                content: assistant.clone(),
            });
        }
        messages.push(Message::User {
            content: text.to_owned(),
        });
        messages
    }

    pub fn record(&mut self, user: String, assistant: String) {
        self.exchanges.push((user, assistant));

        // Exchanges that can never be sent again are dead weight.
        let mut used = estimate_tokens(&self.system_prompt);
        let kept = self
            .exchanges
            .iter()
            .rev()
            .take_while(|(user, assistant)| {
                used += estimate_tokens(user) + estimate_tokens(assistant);
                used <= self.budget
            })
            .count();
        let dropped = self.exchanges.len() - kept;
        if dropped > 0 {
            trace!("dropping {dropped} old exchanges from history");
            self.exchanges.drain(..dropped);
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.exchanges.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }
}

/// A rough token count, about four characters per token.
#[inline]
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> Message {
        Message::User {
            content: content.to_owned(),
        }
    }

    fn assistant(content: &str) -> Message {
        Message::Assistant {
            content: content.to_owned(),
        }
    }

    #[test]
    fn test_messages_include_history() {
        let mut history = History::new("Be brief.".to_owned(), 1000);
        history.record("Hi".to_owned(), "Hello!".to_owned());

        assert_eq!(
            history.messages_for("How are you?"),
            [
                Message::System {
                    content: "Be brief.".to_owned()
                },
                user("Hi"),
                assistant("Hello!"),
                user("How are you?"),
            ]
        );
    }

    #[test]
    fn test_oldest_exchanges_are_dropped() {
        // Every message below is exactly two tokens.
        let mut history = History::new("12345678".to_owned(), 10);
        history.record("aaaaaaaa".to_owned(), "AAAAAAAA".to_owned());
        history.record("bbbbbbbb".to_owned(), "BBBBBBBB".to_owned());
        history.record("cccccccc".to_owned(), "CCCCCCCC".to_owned());
        assert_eq!(history.len(), 2);

        let messages = history.messages_for("dddddddd");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1], user("cccccccc"));
        assert_eq!(messages[3], user("dddddddd"));
    }

    #[test]
    fn test_clear() {
        let mut history = History::new(String::new(), 100);
        history.record("a".to_owned(), "b".to_owned());
        history.clear();
        assert_eq!(history.len(), 0);
        assert_eq!(history.messages_for("c").len(), 2);
    }
}
