//! Stateless evaluation of filter conditions against documents.

use crate::filter::{Combination, Condition, Filter, Operation};
use crate::model::Document;
use serde_json::Value;

/// Resolve a condition field against a document.
///
/// `meta.`-prefixed names look up the metadata bag (absent key resolves to
/// null); other names resolve to direct document attributes.
pub fn resolve_field(document: &Document, field: &str) -> Value {
    if let Some(key) = field.strip_prefix("meta.") {
        return document.metadata.get(key).cloned().unwrap_or(Value::Null);
    }

    match field {
        "id" => Value::String(document.id.to_string()),
        "collection_id" => Value::String(document.collection_id.to_string()),
        "content" => Value::String(document.content.clone()),
        "created_at" => Value::String(document.created_at.to_rfc3339()),
        "updated_at" => Value::String(document.updated_at.to_rfc3339()),
        _ => Value::Null,
    }
}

/// Evaluate one condition against one document.
pub fn apply(document: &Document, condition: &Condition) -> bool {
    let resolved = resolve_field(document, &condition.field);

    let outcome = if resolved.is_null() {
        evaluate_null(condition)
    } else {
        evaluate(&resolved, condition)
    };

    if condition.negate { !outcome } else { outcome }
}

/// Null-value policy: a null resolved value matches `equals` only against a
/// null comparison value and `in` only when the comparison array contains
/// null; every other operator is false.
fn evaluate_null(condition: &Condition) -> bool {
    match condition.operation {
        Operation::Equals => condition.value.is_null(),
        Operation::In => condition
            .value
            .as_array()
            .is_some_and(|members| members.iter().any(Value::is_null)),
        _ => false,
    }
}

fn evaluate(resolved: &Value, condition: &Condition) -> bool {
    let value = &condition.value;
    match condition.operation {
        Operation::Equals => values_equal(resolved, value),
        Operation::EqualsCi => match (resolved.as_str(), value.as_str()) {
            (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => false,
        },
        Operation::Gt | Operation::Gte | Operation::Lt | Operation::Lte => {
            let Some(ordering) = numeric_cmp(resolved, value) else {
                return false;
            };
            match condition.operation {
                Operation::Gt => ordering == std::cmp::Ordering::Greater,
                Operation::Gte => ordering != std::cmp::Ordering::Less,
                Operation::Lt => ordering == std::cmp::Ordering::Less,
                Operation::Lte => ordering != std::cmp::Ordering::Greater,
                _ => false,
            }
        }
        Operation::Contains => match resolved {
            // Substring on strings, membership on arrays.
            Value::String(s) => value.as_str().is_some_and(|needle| s.contains(needle)),
            Value::Array(items) => items.iter().any(|item| values_equal(item, value)),
            _ => false,
        },
        Operation::ContainsCi => match (resolved.as_str(), value.as_str()) {
            (Some(s), Some(needle)) => s.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
        Operation::StartsWith => string_test(resolved, value, |s, p| s.starts_with(p)),
        Operation::StartsWithCi => {
            string_test_ci(resolved, value, |s, p| s.starts_with(p.as_str()))
        }
        Operation::EndsWith => string_test(resolved, value, |s, p| s.ends_with(p)),
        Operation::EndsWithCi => string_test_ci(resolved, value, |s, p| s.ends_with(p.as_str())),
        Operation::In => value
            .as_array()
            .is_some_and(|members| members.iter().any(|member| values_equal(resolved, member))),
    }
}

fn string_test(resolved: &Value, value: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match (resolved.as_str(), value.as_str()) {
        (Some(s), Some(probe)) => test(s, probe),
        _ => false,
    }
}

fn string_test_ci(resolved: &Value, value: &Value, test: impl Fn(&str, String) -> bool) -> bool {
    match (resolved.as_str(), value.as_str()) {
        (Some(s), Some(probe)) => test(&s.to_lowercase(), probe.to_lowercase()),
        _ => false,
    }
}

/// Strict equality, with integers and floats compared numerically so that
/// `10` matches `10.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        return match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
    }
    a == b
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Evaluate a whole filter: AND is the conjunction of all conditions, OR the
/// disjunction.
pub fn document_meets(document: &Document, filter: &Filter) -> bool {
    match filter.combination {
        Combination::And => filter
            .conditions
            .iter()
            .all(|condition| apply(document, condition)),
        Combination::Or => filter
            .conditions
            .iter()
            .any(|condition| apply(document, condition)),
    }
}

/// Lazily yield the documents matching the filter, preserving input order.
///
/// Pure over its input: the returned iterator borrows the slice and can be
/// recreated at will.
pub fn filter_documents<'a>(
    documents: &'a [Document],
    filter: &'a Filter,
) -> impl Iterator<Item = &'a Document> + 'a {
    documents
        .iter()
        .filter(move |document| document_meets(document, filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn doc(metadata: Value) -> Document {
        let map = match metadata {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Document::new(Uuid::new_v4(), "", map)
    }

    fn doc_with_content(content: &str) -> Document {
        Document::new(Uuid::new_v4(), content, serde_json::Map::new())
    }

    /// The four-document fixture from the design discussion: sizes and types
    /// exercising the ordering + membership combination.
    fn fixture() -> Vec<Document> {
        vec![
            doc(json!({"size": 10000, "type": "image"})),
            doc_with_content("text content"),
            doc(json!({"size": 50000, "type": "video"})),
            doc(json!({"size": 12345, "type": "pdf"})),
        ]
    }

    #[test]
    fn and_combination_selects_single_match() {
        let documents = fixture();
        let filter = Filter::all(vec![
            Condition::new("meta.size", Operation::Lt, json!(30000)).unwrap(),
            Condition::new("meta.type", Operation::In, json!(["image", "video"])).unwrap(),
        ]);

        let matched: Vec<&Document> = filter_documents(&documents, &filter).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, documents[0].id);
    }

    #[test]
    fn negated_in_selects_complement_within_and() {
        let documents = fixture();
        let filter = Filter::all(vec![
            Condition::new("meta.size", Operation::Lt, json!(30000)).unwrap(),
            Condition::new("meta.type", Operation::In, json!(["image", "video"]))
                .unwrap()
                .negated(),
        ]);

        let matched: Vec<&Document> = filter_documents(&documents, &filter).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, documents[3].id);
    }

    #[test]
    fn negated_in_is_exact_complement() {
        let documents = fixture();
        let member = Condition::new("meta.type", Operation::In, json!(["image", "video"])).unwrap();
        let non_member = member.clone().negated();

        let positive: Vec<Uuid> = filter_documents(&documents, &Filter::all(vec![member]))
            .map(|d| d.id)
            .collect();
        let negative: Vec<Uuid> = filter_documents(&documents, &Filter::all(vec![non_member]))
            .map(|d| d.id)
            .collect();

        assert_eq!(positive.len() + negative.len(), documents.len());
        for document in &documents {
            assert_ne!(
                positive.contains(&document.id),
                negative.contains(&document.id)
            );
        }
    }

    #[test]
    fn filtering_preserves_input_order() {
        let documents = fixture();
        let filter = Filter::all(vec![
            Condition::new("meta.size", Operation::Gt, json!(0)).unwrap(),
        ]);

        let matched: Vec<Uuid> = filter_documents(&documents, &filter).map(|d| d.id).collect();
        assert_eq!(
            matched,
            vec![documents[0].id, documents[2].id, documents[3].id]
        );
    }

    #[test]
    fn filter_iterator_is_restartable() {
        let documents = fixture();
        let filter = Filter::all(vec![
            Condition::new("meta.size", Operation::Lt, json!(30000)).unwrap(),
        ]);

        let first: Vec<Uuid> = filter_documents(&documents, &filter).map(|d| d.id).collect();
        let second: Vec<Uuid> = filter_documents(&documents, &filter).map(|d| d.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn ordering_on_null_field_is_false_unless_negated() {
        let document = doc_with_content("no metadata here");
        let condition = Condition::new("meta.size", Operation::Lt, json!(30000)).unwrap();
        assert!(!apply(&document, &condition));
        assert!(apply(&document, &condition.negated()));
    }

    #[test]
    fn equals_null_matches_absent_and_null_fields() {
        let absent = doc(json!({"other": 1}));
        let explicit_null = doc(json!({"owner": null}));
        let present = doc(json!({"owner": "ops"}));

        let condition = Condition::new("meta.owner", Operation::Equals, json!(null)).unwrap();
        assert!(apply(&absent, &condition));
        assert!(apply(&explicit_null, &condition));
        assert!(!apply(&present, &condition));
    }

    #[test]
    fn in_with_null_member_matches_null_field() {
        let absent = doc(json!({}));
        let condition =
            Condition::new("meta.owner", Operation::In, json!(["ops", null])).unwrap();
        assert!(apply(&absent, &condition));

        let without_null = Condition::new("meta.owner", Operation::In, json!(["ops"])).unwrap();
        assert!(!apply(&absent, &without_null));
    }

    #[test]
    fn equals_ci_ignores_case() {
        let document = doc(json!({"type": "Image"}));
        let condition = Condition::new("meta.type", Operation::EqualsCi, json!("image")).unwrap();
        assert!(apply(&document, &condition));
    }

    #[test]
    fn contains_handles_strings_and_arrays() {
        let text = doc_with_content("the quick brown fox");
        let contains = Condition::new("content", Operation::Contains, json!("quick")).unwrap();
        assert!(apply(&text, &contains));

        let tagged = doc(json!({"tags": ["alpha", "beta"]}));
        let member = Condition::new("meta.tags", Operation::Contains, json!("beta")).unwrap();
        assert!(apply(&tagged, &member));
        let missing = Condition::new("meta.tags", Operation::Contains, json!("gamma")).unwrap();
        assert!(!apply(&tagged, &missing));
    }

    #[test]
    fn prefix_and_suffix_variants() {
        let document = doc_with_content("Report-2024.pdf");
        assert!(apply(
            &document,
            &Condition::new("content", Operation::StartsWith, json!("Report")).unwrap()
        ));
        assert!(!apply(
            &document,
            &Condition::new("content", Operation::StartsWith, json!("report")).unwrap()
        ));
        assert!(apply(
            &document,
            &Condition::new("content", Operation::StartsWithCi, json!("report")).unwrap()
        ));
        assert!(apply(
            &document,
            &Condition::new("content", Operation::EndsWithCi, json!(".PDF")).unwrap()
        ));
    }

    #[test]
    fn integer_and_float_compare_numerically() {
        let document = doc(json!({"size": 10000}));
        let condition = Condition::new("meta.size", Operation::Equals, json!(10000.0)).unwrap();
        assert!(apply(&document, &condition));
    }

    #[test]
    fn or_combination_is_disjunction() {
        let documents = fixture();
        let filter = Filter::any(vec![
            Condition::new("meta.type", Operation::Equals, json!("pdf")).unwrap(),
            Condition::new("meta.size", Operation::Gt, json!(40000)).unwrap(),
        ]);

        let matched: Vec<Uuid> = filter_documents(&documents, &filter).map(|d| d.id).collect();
        assert_eq!(matched, vec![documents[2].id, documents[3].id]);
    }

    #[test]
    fn empty_and_matches_all_empty_or_matches_none() {
        let documents = fixture();
        assert_eq!(
            filter_documents(&documents, &Filter::all(vec![])).count(),
            documents.len()
        );
        assert_eq!(filter_documents(&documents, &Filter::any(vec![])).count(), 0);
    }
}
