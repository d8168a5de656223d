//! Out-of-order and redundant releases.

use threadvar::ScopedVariable;

use crate::common::{assert_current, assert_empty};

#[test]
fn releasing_a_middle_scope_discards_everything_nested_inside_it() {
    let variable: ScopedVariable<Option<i32>> = ScopedVariable::new();

    assert_empty(&variable);
    let outer = variable.use_value(Some(1));
    assert_current(&variable, &Some(1));
    let middle = variable.use_value(Some(2));
    assert_current(&variable, &Some(2));
    let inner = variable.use_value(Some(3));
    assert_current(&variable, &Some(3));

    middle.release();
    assert_current(&variable, &Some(1));

    // `middle`'s release already discarded `inner`, so this must not revert
    // anything further.
    inner.release();
    assert_current(&variable, &Some(1));

    outer.release();
    assert_empty(&variable);
}

#[test]
fn dead_handle_leaves_later_overrides_alone() {
    let variable = ScopedVariable::new();

    let outer = variable.use_value("outer");
    let inner = variable.use_value("inner");
    outer.release();
    assert_empty(&variable);

    // The freed positions are reused; the dead inner handle must stay inert.
    let _replacement = variable.use_value("replacement");
    inner.release();
    assert_current(&variable, &"replacement");
}

#[test]
fn deep_nesting_round_trips_through_every_level() {
    let variable = ScopedVariable::with_fallback(0usize);
    let mut scopes: Vec<_> = (1..=16).map(|depth| variable.use_value(depth)).collect();
    assert_current(&variable, &16);

    while let Some(scope) = scopes.pop() {
        scope.release();
        assert_current(&variable, &scopes.len());
    }
}
