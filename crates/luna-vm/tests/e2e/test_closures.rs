use super::helpers::*;

#[test]
fn test_counter_keeps_state() {
    run_check_ints(
        "local function counter()
            local n = 0
            return function() n = n + 1 return n end
         end
         local c = counter()
         c() c()
         return c()",
        &[3],
    );
}

#[test]
fn test_independent_instances() {
    run_check_ints(
        "local function counter()
            local n = 0
            return function() n = n + 1 return n end
         end
         local a, b = counter(), counter()
         a() a()
         return a(), b()",
        &[3, 1],
    );
}

#[test]
fn test_siblings_share_upvalue_after_return() {
    run_check_ints(
        "local function pair()
            local v = 0
            local function get() return v end
            local function set(x) v = x end
            return get, set
         end
         local get, set = pair()
         set(41)
         local before = get()
         set(get() + 1)
         return before, get()",
        &[41, 42],
    );
}

#[test]
fn test_write_through_upvalue_visible_to_enclosing_frame() {
    run_check_ints(
        "local x = 1
         local function bump() x = x * 10 end
         bump() bump()
         return x",
        &[100],
    );
}

#[test]
fn test_each_loop_iteration_gets_fresh_local() {
    run_check_ints(
        "local fs = {}
         for i = 1, 3 do fs[i] = function() return i end end
         return fs[1](), fs[2](), fs[3]()",
        &[1, 2, 3],
    );
}

#[test]
fn test_while_body_locals_are_fresh() {
    run_check_ints(
        "local fs, i = {}, 0
         while i < 3 do
             i = i + 1
             local j = i * 2
             fs[i] = function() return j end
         end
         return fs[1](), fs[3]()",
        &[2, 6],
    );
}

#[test]
fn test_upvalue_of_upvalue() {
    run_check_ints(
        "local function outer()
            local a = 5
            return function()
                return function() a = a + 1 return a end
            end
         end
         local mid = outer()
         local f, g = mid(), mid()
         f()
         return g()",
        &[7],
    );
}

#[test]
fn test_recursive_local_function() {
    run_check_ints(
        "local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end
         return fact(10)",
        &[3628800],
    );
}

#[test]
fn test_mutual_recursion_through_locals() {
    let r = run_lua(
        "local is_even, is_odd
         function is_even(n) if n == 0 then return true end return is_odd(n - 1) end
         function is_odd(n) if n == 0 then return false end return is_even(n - 1) end
         return is_even(10), is_odd(7), is_even(3)",
    );
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, false);
}

#[test]
fn test_closure_in_block_closed_by_break() {
    run_check_ints(
        "local f
         for i = 1, 10 do
             local captured = i
             f = function() return captured end
             if i == 4 then break end
         end
         local noise = {7, 8, 9}
         return f()",
        &[4],
    );
}

#[test]
fn test_method_call_with_self() {
    run_check_ints(
        "local obj = {n = 2}
         function obj:scale(k) self.n = self.n * k return self end
         obj:scale(3):scale(7)
         return obj.n",
        &[42],
    );
}
