use super::helpers::*;

#[test]
fn test_fibonacci() {
    run_check_ints(
        "local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end
         return fib(20)",
        &[6765],
    );
}

#[test]
fn test_insertion_sort() {
    run_check_ints(
        "local t = {5, 3, 9, 1, 7, 2, 8}
         for i = 2, #t do
             local v, j = t[i], i - 1
             while j >= 1 and t[j] > v do t[j + 1] = t[j] j = j - 1 end
             t[j + 1] = v
         end
         return t[1], t[4], t[7]",
        &[1, 5, 9],
    );
}

#[test]
fn test_sieve() {
    run_check_ints(
        "local n, composite, count = 100, {}, 0
         for i = 2, n do
             if not composite[i] then
                 count = count + 1
                 for j = i * i, n, i do composite[j] = true end
             end
         end
         return count",
        &[25],
    );
}

#[test]
fn test_string_building_and_comparison() {
    let r = run_lua(
        "local parts = {}
         for i = 1, 5 do parts[#parts + 1] = tostring(i) end
         local s = ''
         for _, p in ipairs(parts) do s = s .. p .. ',' end
         return s, 'abc' < 'abd', 'Z' < 'a', #s",
    );
    assert_str(&r, 0, "1,2,3,4,5,");
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, true);
    assert_int(&r, 3, 10);
}

#[test]
fn test_linked_list() {
    run_check_ints(
        "local list
         for i = 1, 5 do list = {value = i, next = list} end
         local s, n = 0, list
         while n do s = s + n.value n = n.next end
         return s",
        &[15],
    );
}

#[test]
fn test_memoized_closure_table() {
    run_check_ints(
        "local memo = {}
         local function f(n)
             if n <= 2 then return 1 end
             local hit = memo[n]
             if hit then return hit end
             local v = f(n - 1) + f(n - 2)
             memo[n] = v
             return v
         end
         return f(80)",
        &[23416728348467685],
    );
}

#[test]
fn test_print_output() {
    let out = run_lua_output(
        "print('hello', 1, 2.0, nil, true)
         print()
         print(10 // 3, 10 / 4, 2^10, -0.0)",
    );
    assert_eq!(out, "hello\t1\t2.0\tnil\ttrue\n\n3\t2.5\t1024.0\t-0.0\n");
}

#[test]
fn test_integer_float_distinction() {
    let r = run_lua("return 3 // 1, 3.0 // 1, 7 % 3, 7.5 % 2, 1e15, 2^63");
    assert_int(&r, 0, 3);
    assert_float(&r, 1, 3.0);
    assert_int(&r, 2, 1);
    assert_float(&r, 3, 1.5);
    assert_float(&r, 4, 1e15);
    assert_float(&r, 5, 9223372036854775808.0);
}

#[test]
fn test_table_keys_normalize() {
    run_check_ints(
        "local t = {}
         t[1.0] = 10
         t[2] = 20
         return t[1], t[2.0], #t",
        &[10, 20, 2],
    );
}

#[test]
fn test_multiple_assignment_evaluation() {
    run_check_ints(
        "local a, b, c = 1, 2
         a, b = b, a
         local t = {}
         local i = 1
         t[i], i = 20, i + 1
         return a, b, c == nil and 1 or 0, t[1], i",
        &[2, 1, 1, 20, 2],
    );
}

#[test]
fn test_logical_operators_short_circuit() {
    let r = run_lua(
        "local calls = 0
         local function hit() calls = calls + 1 return true end
         local a = false and hit()
         local b = nil or 'default'
         local c = 1 and 2
         local d = hit() or hit()
         return a, b, c, d, calls",
    );
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "default");
    assert_int(&r, 2, 2);
    assert_bool(&r, 3, true);
    assert_int(&r, 4, 1);
}
