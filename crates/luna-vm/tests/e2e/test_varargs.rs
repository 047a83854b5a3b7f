use super::helpers::*;

#[test]
fn test_missing_params_are_nil() {
    let r = run_lua("local function f(a, b, c) return a, b, c end return f(1)");
    assert_eq!(r.len(), 3);
    assert_int(&r, 0, 1);
    assert_nil(&r, 1);
    assert_nil(&r, 2);
}

#[test]
fn test_extra_args_dropped() {
    run_check_ints("local function f(a, b) return a + b end return f(1, 2, 3, 4)", &[3]);
}

#[test]
fn test_vararg_count_excludes_fixed_params() {
    run_check_ints(
        "local function f(a, ...) return select('#', ...) end
         return f(), f(1), f(1, 2, 3), f(1, nil, nil)",
        &[0, 0, 2, 2],
    );
}

#[test]
fn test_vararg_expands_in_last_position() {
    run_check_ints(
        "local function id(...) return ... end
         local function sum(...)
             local s = 0
             for _, v in ipairs({...}) do s = s + v end
             return s
         end
         return sum(id(1, 2, 3)), sum(id(1, 2), 10), sum(10, id(1, 2))",
        &[6, 11, 13],
    );
}

#[test]
fn test_vararg_truncated_in_middle() {
    run_check_ints(
        "local function three() return 1, 2, 3 end
         local t = {three(), three()}
         return #t",
        &[4],
    );
}

#[test]
fn test_vararg_in_main_chunk() {
    let r = run_lua("return select('#', ...)");
    assert_int(&r, 0, 0);
}

#[test]
fn test_vararg_assignment_adjusts() {
    let r = run_lua(
        "local function f(...) local a, b, c = ... return a, b, c end
         return f(7, 8)",
    );
    assert_int(&r, 0, 7);
    assert_int(&r, 1, 8);
    assert_nil(&r, 2);
}

#[test]
fn test_parenthesized_call_yields_one_value() {
    run_check_ints(
        "local function two() return 1, 2 end
         return select('#', (two())), select('#', two())",
        &[1, 2],
    );
}

#[test]
fn test_nil_holes_preserved_in_varargs() {
    let r = run_lua(
        "local function pass(...) return ... end
         return pass(nil, 2, nil)",
    );
    assert_eq!(r.len(), 3);
    assert_nil(&r, 0);
    assert_int(&r, 1, 2);
    assert_nil(&r, 2);
}

#[test]
fn test_select_negative_index_on_varargs() {
    run_check_ints(
        "local function last(...) return (select(-1, ...)) end
         return last(4, 5, 6)",
        &[6],
    );
}

#[test]
fn test_tail_call_passes_varargs() {
    run_check_ints(
        "local function count(...) return select('#', ...) end
         local function fwd(...) return count(...) end
         return fwd(1, 2, 3, 4, 5)",
        &[5],
    );
}
