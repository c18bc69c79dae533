/// Header fields of one message, in arrival order.
///
/// Field names compare ASCII case-insensitively, the same way MIME parsers
/// treat them. Values are stored trimmed but otherwise untouched.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    fields: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl AsRef<str>) {
        self.fields
            .push((name.into(), value.as_ref().trim().to_string()));
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Value of the last field named `name`.
    pub fn last(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut headers = HeaderMap::new();
        headers.append("Subject", "hello");
        headers.append("TO", "a@example.com");

        assert_eq!(headers.first("subject"), Some("hello"));
        assert_eq!(headers.last("to"), Some("a@example.com"));
        assert_eq!(headers.first("From"), None);
    }

    #[test]
    fn test_repeated_fields_keep_order() {
        let mut headers = HeaderMap::new();
        headers.append("To", " first@example.com ");
        headers.append("Received", "from a");
        headers.append("to", "second@example.com");

        assert_eq!(headers.len(), 3);
        assert_eq!(headers.first("To"), Some("first@example.com"));
        assert_eq!(headers.last("To"), Some("second@example.com"));
        assert_eq!(
            headers.get_all("To").collect::<Vec<_>>(),
            vec!["first@example.com", "second@example.com"]
        );

        headers.clear();
        assert!(headers.is_empty());
        assert_eq!(headers.last("To"), None);
    }
}
