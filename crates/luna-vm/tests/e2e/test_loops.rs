use super::helpers::*;

#[test]
fn test_numeric_for_ascending() {
    run_check_ints(
        "local n, last = 0, nil
         for i = 1, 5 do n = n + 1 last = i end
         return n, last",
        &[5, 5],
    );
}

#[test]
fn test_numeric_for_descending() {
    run_check_ints(
        "local order = {}
         for i = 5, 1, -1 do order[#order + 1] = i end
         return #order, order[1], order[5]",
        &[5, 5, 1],
    );
}

#[test]
fn test_numeric_for_empty_range() {
    run_check_ints("local n = 0 for i = 1, 0 do n = n + 1 end return n", &[0]);
}

#[test]
fn test_numeric_for_step() {
    run_check_ints("local s = 0 for i = 0, 10, 3 do s = s + i end return s", &[18]);
}

#[test]
fn test_loop_variable_is_a_copy() {
    run_check_ints(
        "local n = 0
         for i = 1, 3 do i = i * 100 n = n + 1 end
         return n",
        &[3],
    );
}

#[test]
fn test_float_for_yields_floats() {
    let r = run_lua("local last for x = 1.0, 2 do last = x end return last");
    assert_float(&r, 0, 2.0);
}

#[test]
fn test_while_and_repeat() {
    run_check_ints(
        "local i, s = 0, 0
         while i < 10 do i = i + 1 s = s + i end
         local j = 0
         repeat local k = j j = j + 1 until k >= 4
         return s, j",
        &[55, 5],
    );
}

#[test]
fn test_nested_break() {
    run_check_ints(
        "local hits = 0
         for i = 1, 5 do
             for j = 1, 5 do
                 if j > i then break end
                 hits = hits + 1
             end
         end
         return hits",
        &[15],
    );
}

#[test]
fn test_goto_continue() {
    run_check_ints(
        "local s = 0
         for i = 1, 10 do
             if i % 2 == 0 then goto continue end
             s = s + i
             ::continue::
         end
         return s",
        &[25],
    );
}

#[test]
fn test_backward_goto_loop() {
    run_check_ints(
        "local i = 0
         ::top::
         i = i + 1
         if i < 7 then goto top end
         return i",
        &[7],
    );
}

#[test]
fn test_generic_for_over_ipairs() {
    run_check_ints(
        "local t = {10, 20, 30, nil, 50}
         local s, n = 0, 0
         for i, v in ipairs(t) do s = s + v n = i end
         return s, n",
        &[60, 3],
    );
}

#[test]
fn test_generic_for_over_pairs() {
    run_check_ints(
        "local t = {1, 2, 3, a = 4, b = 5}
         local s, n = 0, 0
         for k, v in pairs(t) do s = s + v n = n + 1 end
         return s, n",
        &[15, 5],
    );
}

#[test]
fn test_generic_for_with_stateful_closure() {
    run_check_ints(
        "local function upto(n)
             local i = 0
             return function() i = i + 1 if i <= n then return i, i * i end end
         end
         local s = 0
         for i, sq in upto(4) do s = s + sq end
         return s",
        &[30],
    );
}

#[test]
fn test_clearing_fields_during_pairs() {
    run_check_ints(
        "local t = {}
         for i = 1, 20 do t['k' .. i] = i end
         local n = 0
         for k in pairs(t) do t[k] = nil n = n + 1 end
         return n, next(t) == nil and 1 or 0",
        &[20, 1],
    );
}
