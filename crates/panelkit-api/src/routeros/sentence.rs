// RouterOS request/response sentences
//
// `Command` builds request words; `Reply` classifies decoded response
// words. Neither touches bytes directly beyond delegating to the codec.

use std::collections::BTreeMap;
use std::fmt;

use bytes::BytesMut;

use crate::error::Error;
use crate::routeros::codec::encode_sentence;

/// Attribute words of one reply sentence, keyed without the `=` markers.
pub type Attributes = BTreeMap<String, String>;

/// A request sentence: a command path followed by attribute, query, and
/// tag words.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    words: Vec<String>,
}

impl Command {
    /// Start a command, e.g. `Command::new("/ppp/secret/print")`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            words: vec![path.into()],
        }
    }

    /// `=key=value`
    #[must_use]
    pub fn attr(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.words.push(format!("={key}={}", value.as_ref()));
        self
    }

    /// `?key=value` query filter for `print`.
    #[must_use]
    pub fn query(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.words.push(format!("?{key}={}", value.as_ref()));
        self
    }

    /// `=.proplist=a,b,c` restricting the returned attributes.
    #[must_use]
    pub fn proplist(self, props: &[&str]) -> Self {
        let joined = props.join(",");
        self.attr(".proplist", joined)
    }

    /// `.tag=value`, echoed back on every reply to this command.
    #[must_use]
    pub fn tag(mut self, tag: impl AsRef<str>) -> Self {
        self.words.push(format!(".tag={}", tag.as_ref()));
        self
    }

    pub fn path(&self) -> &str {
        self.words.first().map_or("", String::as_str)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn encode(&self) -> Result<BytesMut, Error> {
        encode_sentence(&self.words)
    }
}

// Only the path is printed; attribute words may carry passwords.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path())
            .field("words", &self.words.len())
            .finish()
    }
}

/// One classified response sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `!done` with any trailing attributes (e.g. `=ret=` from `/login` or `add`).
    Done(Attributes),
    /// `!re`: one result row.
    Row(Attributes),
    /// `!trap`: command failed.
    Trap {
        message: String,
        category: Option<u32>,
    },
    /// `!fatal`: the router is closing the connection.
    Fatal(String),
}

impl Reply {
    /// Classify a decoded sentence by its first word.
    pub fn parse(words: Vec<String>) -> Result<Self, Error> {
        let mut iter = words.into_iter();
        let Some(kind) = iter.next() else {
            return Err(Error::Protocol("empty reply sentence".into()));
        };

        match kind.as_str() {
            "!done" => Ok(Self::Done(parse_attributes(iter))),
            "!re" => Ok(Self::Row(parse_attributes(iter))),
            "!trap" => {
                let mut attrs = parse_attributes(iter);
                let message = attrs
                    .remove("message")
                    .unwrap_or_else(|| "unknown error".into());
                let category = attrs.get("category").and_then(|c| c.parse().ok());
                Ok(Self::Trap { message, category })
            }
            "!fatal" => {
                let message = iter.collect::<Vec<_>>().join(" ");
                Ok(Self::Fatal(message))
            }
            other => Err(Error::Protocol(format!("unexpected reply word {other:?}"))),
        }
    }
}

/// Collect `=key=value` words. Values may themselves contain `=`; tag and
/// other non-attribute words are skipped.
fn parse_attributes(words: impl Iterator<Item = String>) -> Attributes {
    words
        .filter_map(|word| {
            let rest = word.strip_prefix('=')?;
            let (key, value) = rest.split_once('=').unwrap_or((rest, ""));
            Some((key.to_owned(), value.to_owned()))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::routeros::codec::SentenceDecoder;
    use pretty_assertions::assert_eq;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| (*w).to_owned()).collect()
    }

    #[test]
    fn command_words_are_formatted() {
        let cmd = Command::new("/ppp/secret/print")
            .query("name", "alice")
            .proplist(&[".id", "name"])
            .attr("comment", "a=b");
        assert_eq!(
            cmd.words(),
            &words(&[
                "/ppp/secret/print",
                "?name=alice",
                "=.proplist=.id,name",
                "=comment=a=b",
            ])[..]
        );
        assert_eq!(cmd.path(), "/ppp/secret/print");
    }

    #[test]
    fn attribute_values_keep_equals_signs() {
        let reply = Reply::parse(words(&["!re", "=comment=expires=1700000000", "=.id=*1"])).unwrap();
        let Reply::Row(attrs) = reply else {
            panic!("expected row");
        };
        assert_eq!(attrs["comment"], "expires=1700000000");
        assert_eq!(attrs[".id"], "*1");
    }

    #[test]
    fn trap_carries_message_and_category() {
        let reply = Reply::parse(words(&[
            "!trap",
            "=category=1",
            "=message=failure: already have user with this name",
        ]))
        .unwrap();
        assert_eq!(
            reply,
            Reply::Trap {
                message: "failure: already have user with this name".into(),
                category: Some(1),
            }
        );
    }

    #[test]
    fn row_then_done_parses_without_leftovers() {
        let mut buf = encode_sentence(["!re", "=name=a", "=profile=p"]).unwrap();
        buf.extend_from_slice(&encode_sentence(["!done"]).unwrap());

        let mut decoder = SentenceDecoder::new();
        let first = Reply::parse(decoder.decode(&mut buf).unwrap().unwrap()).unwrap();
        let second = Reply::parse(decoder.decode(&mut buf).unwrap().unwrap()).unwrap();

        let expected: Attributes = [("name", "a"), ("profile", "p")]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        assert_eq!(first, Reply::Row(expected));
        assert_eq!(second, Reply::Done(Attributes::new()));
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_reply_word_is_protocol_error() {
        assert!(matches!(
            Reply::parse(words(&["!bogus"])),
            Err(Error::Protocol(_))
        ));
    }
}
