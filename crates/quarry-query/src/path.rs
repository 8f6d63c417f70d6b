use bson::{Bson, Document};

/// Resolve a dot-notation path (`"owner.address.city"`) against a document.
///
/// Only descends through embedded documents; an array on the way yields
/// `None` since the path does not name a single value.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => doc.get(path),
        Some((head, rest)) => match doc.get(head)? {
            Bson::Document(sub) => get_path(sub, rest),
            _ => None,
        },
    }
}

/// Insert `value` at a dot-notation path, creating embedded documents on
/// the way. A non-document value sitting on the path is replaced.
pub fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(sub)) = doc.get_mut(head) {
                set_path(sub, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn nested_lookup() {
        let doc = doc! { "owner": { "address": { "city": "Austin" } }, "id": 1 };
        assert_eq!(get_path(&doc, "id"), Some(&Bson::Int32(1)));
        assert_eq!(
            get_path(&doc, "owner.address.city"),
            Some(&Bson::String("Austin".into()))
        );
        assert_eq!(get_path(&doc, "owner.missing"), None);
        assert_eq!(get_path(&doc, "id.deeper"), None);
    }

    #[test]
    fn set_creates_intermediate_documents() {
        let mut doc = doc! { "owner": "not-a-doc" };
        set_path(&mut doc, "owner.id", Bson::Int32(3));
        assert_eq!(doc, doc! { "owner": { "id": 3 } });
    }
}
