use grist_formula::{rename_in_source, transform};

#[test]
fn transforms_conditional_formula_into_body() {
    let out = transform("IF($total > 100, 'big', 'small')").unwrap();
    assert!(!out.was_empty);
}

#[test]
fn rename_then_inverse_rename_round_trips() {
    let original = "IF($amount > 0, $amount, -$amount)";
    let renamed = rename_in_source(original, &["amount"], "value").unwrap();
    let restored = rename_in_source(&renamed, &["value"], "amount").unwrap();
    assert_eq!(restored, original);
}

#[test]
fn rejects_assignment_to_record() {
    let err = transform("rec.total = 5").unwrap_err();
    let _ = err;
}
