//! Just enough of the JSON text-component format to render
//! a disconnect reason as plain text.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A text component: either literal `text` or a `translate` key with
/// arguments, followed by `extra` siblings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translate: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub with: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<ChatMessage>,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing plain strings and vectors cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Flattens the component tree, rendering translations as
    /// `key[arg, ...]` since no language file is available.
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        self.write_plain(&mut out);
        out
    }

    fn write_plain(&self, out: &mut String) {
        out.push_str(&self.text);
        if let Some(key) = &self.translate {
            out.push_str(key);
            if !self.with.is_empty() {
                let args: Vec<_> = self.with.iter().map(Self::to_plain_text).collect();
                out.push('[');
                out.push_str(&args.join(", "));
                out.push(']');
            }
        }
        for sibling in &self.extra {
            sibling.write_plain(out);
        }
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain_text())
    }
}

/// Servers may send a bare string, an array (first element is the parent)
/// or a component object. Numbers and booleans stand in for strings,
/// e.g. a protocol version passed as a translation argument.
#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Plain(Scalar),
    List(Vec<ChatMessage>),
    Component(Component),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl Default for Scalar {
    fn default() -> Self {
        Scalar::String(String::new())
    }
}

impl From<Scalar> for String {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::String(s) => s,
            Scalar::Number(n) => n.to_string(),
            Scalar::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct Component {
    #[serde(default)]
    text: Scalar,
    #[serde(default)]
    translate: Option<String>,
    #[serde(default)]
    with: Vec<ChatMessage>,
    #[serde(default)]
    extra: Vec<ChatMessage>,
}

impl<'de> Deserialize<'de> for ChatMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Plain(text) => ChatMessage::text(text),
            Repr::List(parts) => {
                let mut parts = parts.into_iter();
                let mut parent = parts.next().unwrap_or_default();
                parent.extra.extend(parts);
                parent
            }
            Repr::Component(component) => ChatMessage {
                text: component.text.into(),
                translate: component.translate,
                with: component.with,
                extra: component.extra,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ChatMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn text_component() {
        assert_eq!(parse(r#"{"text":"Server full"}"#).to_string(), "Server full");
    }

    #[test]
    fn bare_string() {
        assert_eq!(parse(r#""Kicked""#).to_string(), "Kicked");
    }

    #[test]
    fn extra_siblings_are_appended() {
        let message = parse(r#"{"text":"You are ","extra":[{"text":"banned","bold":true},"!"]}"#);
        assert_eq!(message.to_plain_text(), "You are banned!");
    }

    #[test]
    fn array_form() {
        assert_eq!(parse(r#"["a", {"text":"b"}, "c"]"#).to_plain_text(), "abc");
    }

    #[test]
    fn translation_keeps_key_and_args() {
        let message = parse(
            r#"{"translate":"multiplayer.disconnect.incompatible","with":[{"text":"1.20.4"}]}"#,
        );
        assert_eq!(
            message.to_plain_text(),
            "multiplayer.disconnect.incompatible[1.20.4]"
        );
    }

    #[test]
    fn numeric_translation_argument() {
        let message =
            parse(r#"{"translate":"multiplayer.disconnect.outdated_client","with":[758]}"#);
        assert_eq!(
            message.to_plain_text(),
            "multiplayer.disconnect.outdated_client[758]"
        );
    }

    #[test]
    fn scalar_text_and_siblings() {
        assert_eq!(parse(r#"{"text":5}"#).to_plain_text(), "5");
        assert_eq!(parse(r#"{"text":"a","extra":[1, true]}"#).to_plain_text(), "a1true");
        assert_eq!(parse("2.5").to_plain_text(), "2.5");
    }

    #[test]
    fn json_survives_reparse() {
        let message = ChatMessage::text("Server full");
        assert_eq!(message.to_json(), r#"{"text":"Server full"}"#);
        assert_eq!(parse(&message.to_json()), message);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(serde_json::from_str::<ChatMessage>("{not json").is_err());
    }
}
