use super::*;

fn body(pairs: &[(&str, Value)]) -> Fields {
    let mut fields = Fields::new();
    for (k, v) in pairs {
        fields.insert(*k, v.clone());
    }
    fields
}

fn matches(query: Query, fields: &Fields) -> bool {
    Matcher::new(query).unwrap().matches(fields)
}

#[test]
fn equals_requires_same_type() {
    let record = body(&[("price", Value::Int(10))]);
    assert!(matches(Query::eq("price", Value::Int(10)), &record));
    assert!(!matches(Query::eq("price", Value::Int(11)), &record));
    assert!(!matches(Query::eq("price", Value::Text("10".into())), &record));
    assert!(!matches(Query::eq("missing", Value::Int(10)), &record));
}

#[test]
fn int_and_float_compare_by_magnitude() {
    let record = body(&[("price", Value::Float(10.0))]);
    assert!(matches(Query::eq("price", Value::Int(10)), &record));
    assert!(matches(Query::gt("price", Value::Int(9)), &record));
}

#[test]
fn not_equals_needs_a_present_field() {
    let record = body(&[("price", Value::Int(10))]);
    assert!(matches(Query::ne("price", Value::Int(11)), &record));
    assert!(!matches(Query::ne("price", Value::Int(10)), &record));
    assert!(!matches(Query::ne("missing", Value::Int(10)), &record));
}

#[test]
fn range_operators() {
    let record = body(&[("price", Value::Int(10))]);
    assert!(matches(Query::gt("price", Value::Int(9)), &record));
    assert!(!matches(Query::gt("price", Value::Int(10)), &record));
    assert!(matches(Query::lt("price", Value::Int(11)), &record));

    assert!(matches(
        Query::between("price", Value::Int(10), Value::Int(20), true, true),
        &record
    ));
    assert!(!matches(
        Query::between("price", Value::Int(10), Value::Int(20), false, true),
        &record
    ));
    assert!(matches(
        Query::between("price", Value::Int(0), Value::Int(10), false, true),
        &record
    ));
    assert!(!matches(
        Query::between("price", Value::Int(0), Value::Int(10), true, false),
        &record
    ));
}

#[test]
fn in_checks_membership() {
    let record = body(&[("status", Value::Text("open".into()))]);
    assert!(matches(
        Query::is_in(
            "status",
            vec![Value::Text("open".into()), Value::Text("closed".into())]
        ),
        &record
    ));
    assert!(!matches(
        Query::is_in("status", vec![Value::Text("closed".into())]),
        &record
    ));
}

#[test]
fn contains_on_text_and_lists() {
    let record = body(&[
        ("name", Value::Text("super widget".into())),
        (
            "tags",
            Value::List(vec![Value::Text("new".into()), Value::Int(3)]),
        ),
    ]);
    assert!(matches(
        Query::Contains {
            field: "name".into(),
            value: Value::Text("widg".into())
        },
        &record
    ));
    assert!(matches(
        Query::Contains {
            field: "tags".into(),
            value: Value::Int(3)
        },
        &record
    ));
    assert!(!matches(
        Query::Contains {
            field: "tags".into(),
            value: Value::Int(4)
        },
        &record
    ));
}

#[test]
fn string_affix_operators() {
    let record = body(&[("name", Value::Text("gadget-pro".into()))]);
    assert!(matches(
        Query::StartsWith {
            field: "name".into(),
            prefix: "gadget".into()
        },
        &record
    ));
    assert!(matches(
        Query::EndsWith {
            field: "name".into(),
            suffix: "pro".into()
        },
        &record
    ));
    assert!(!matches(
        Query::StartsWith {
            field: "name".into(),
            prefix: "pro".into()
        },
        &record
    ));
}

#[test]
fn regex_matches_and_bad_patterns_fail_fast() {
    let record = body(&[("sku", Value::Text("AB-1234".into()))]);
    assert!(matches(
        Query::Regex {
            field: "sku".into(),
            pattern: "^[A-Z]{2}-\\d{4}$".into()
        },
        &record
    ));

    let err = Matcher::new(Query::Regex {
        field: "sku".into(),
        pattern: "(unclosed".into(),
    })
    .unwrap_err();
    assert!(matches!(err, DbError::QueryInvalid(_)));
}

#[test]
fn exists_and_is_null() {
    let record = body(&[("a", Value::Int(1)), ("b", Value::Null)]);
    assert!(matches(Query::Exists { field: "a".into() }, &record));
    assert!(matches(Query::Exists { field: "b".into() }, &record));
    assert!(!matches(Query::Exists { field: "c".into() }, &record));

    assert!(matches(Query::IsNull { field: "b".into() }, &record));
    assert!(!matches(Query::IsNull { field: "a".into() }, &record));
    assert!(!matches(Query::IsNull { field: "c".into() }, &record));
}

#[test]
fn boolean_composition() {
    let record = body(&[("price", Value::Int(10)), ("qty", Value::Int(3))]);
    assert!(matches(
        Query::and(vec![
            Query::gt("price", Value::Int(5)),
            Query::lt("qty", Value::Int(5)),
        ]),
        &record
    ));
    assert!(!matches(
        Query::and(vec![
            Query::gt("price", Value::Int(5)),
            Query::gt("qty", Value::Int(5)),
        ]),
        &record
    ));
    assert!(matches(
        Query::or(vec![
            Query::gt("price", Value::Int(99)),
            Query::lt("qty", Value::Int(5)),
        ]),
        &record
    ));
    assert!(matches(
        Query::not(Query::eq("price", Value::Int(11))),
        &record
    ));
}

#[test]
fn full_text_matches_all_terms() {
    let record = body(&[(
        "description",
        Value::Text("The Quick, Brown Fox; jumps over".into()),
    )]);
    assert!(matches(
        Query::FullText {
            field: "description".into(),
            terms: "quick fox".into()
        },
        &record
    ));
    assert!(!matches(
        Query::FullText {
            field: "description".into(),
            terms: "quick wolf".into()
        },
        &record
    ));
}

#[test]
fn nested_field_paths() {
    let record = body(&[(
        "address",
        Value::Map(body(&[("city", Value::Text("Oslo".into()))])),
    )]);
    assert!(matches(
        Query::eq("address.city", Value::Text("Oslo".into())),
        &record
    ));
}

#[test]
fn cache_key_round_trips() {
    let query = Query::and(vec![
        Query::between("price", Value::Float(1.5), Value::Int(20), true, false),
        Query::not(Query::is_in(
            "status",
            vec![Value::Text("closed".into()), Value::Null],
        )),
    ]);
    let key = query.cache_key();
    let back = Query::from_cache_key(&key).unwrap();
    assert_eq!(back, query);
    assert_eq!(back.cache_key(), key);
}

#[test]
fn identical_queries_share_a_cache_key() {
    let a = Query::eq("price", Value::Int(10));
    let b = Query::eq("price", Value::Int(10));
    assert_eq!(a.cache_key(), b.cache_key());
    assert_ne!(
        a.cache_key(),
        Query::eq("price", Value::Int(11)).cache_key()
    );
}

#[test]
fn leaf_field_names_the_constrained_field() {
    assert_eq!(Query::eq("price", Value::Int(1)).leaf_field(), Some("price"));
    assert_eq!(
        Query::FullText {
            field: "desc".into(),
            terms: "x".into()
        }
        .leaf_field(),
        Some("desc")
    );
    assert_eq!(Query::and(vec![]).leaf_field(), None);
    assert_eq!(
        Query::not(Query::eq("a", Value::Null)).leaf_field(),
        None
    );
}

#[test]
fn tokenizer_lowercases_and_splits_punctuation() {
    assert_eq!(
        tokenize("Hello, World-wide WEB!"),
        vec!["hello", "world", "wide", "web"]
    );
    assert!(tokenize("  ,,  ").is_empty());
}
