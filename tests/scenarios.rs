//! Round-trip scenarios: build a tree through the public facade, finalize
//! it, and invoke the resulting machine code. These exercise the full
//! pipeline end to end, not just the construction-time bookkeeping the
//! unit tests beside each module already cover.

use vesuvius::{Arena, CmpOp, Compiler, Ptr};

#[test]
fn s1_immediate_return() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let imm = c.immediate::<i64>(42).unwrap();
    let ret = c.return_of(imm.node()).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn() -> i64 = unsafe { compiled.cast() };
    assert_eq!(f(), 42);
}

#[test]
fn s2_parameter_identity() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let p = c.parameter::<i64>().unwrap();
    let ret = c.return_of(p).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64) -> i64 = unsafe { compiled.cast() };
    assert_eq!(f(7), 7);
}

#[test]
fn s3_sum_of_parameters() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let a = c.parameter::<i64>().unwrap();
    let b = c.parameter::<i64>().unwrap();
    let sum = c.add(a, b).unwrap();
    let ret = c.return_of(sum).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64, i64) -> i64 = unsafe { compiled.cast() };
    assert_eq!(f(3, 4), 7);
}

#[repr(C)]
struct S {
    a: i64,
    b: i64,
}

#[test]
fn s4_field_access() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let p = c.parameter::<Ptr<S>>().unwrap();
    let field = c.field_pointer::<S, i64>(p, 8).unwrap();
    let val = c.deref(field).unwrap();
    let ret = c.return_of(val).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(*const S) -> i64 = unsafe { compiled.cast() };
    let s = S { a: 10, b: 20 };
    assert_eq!(f(&s as *const S), 20);
}

#[repr(C)]
struct Inner {
    pad: i64,
    x: i64,
}

#[repr(C)]
struct Outer {
    pad: i64,
    inner: Inner,
}

#[test]
fn s5_collapsed_field_chain() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let p = c.parameter::<Ptr<Outer>>().unwrap();
    let inner_ptr = c.field_pointer::<Outer, Inner>(p, 8).unwrap();
    let x_ptr = c.field_pointer::<Inner, i64>(inner_ptr, 8).unwrap();
    let val = c.deref(x_ptr).unwrap();
    let ret = c.return_of(val).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(*const Outer) -> i64 = unsafe { compiled.cast() };
    let o = Outer {
        pad: 0,
        inner: Inner { pad: 0, x: 99 },
    };
    assert_eq!(f(&o as *const Outer), 99);
}

/// `deref(field-pointer(p, off2).field-pointer(off1))` with non-field-pointer
/// nodes in between: exercises `field_pointer` collapsing starting from a
/// non-trivial base expression, not just a bare parameter.
#[test]
fn field_pointer_over_a_pointer_plus_index() {
    #[repr(C)]
    struct Pair {
        lo: i64,
        hi: i64,
    }
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let base = c.parameter::<Ptr<Pair>>().unwrap();
    let idx = c.parameter::<u64>().unwrap();
    let elem = c
        .add_ptr(base, idx, std::mem::size_of::<Pair>() as u32)
        .unwrap();
    let hi_ptr = c.field_pointer::<Pair, i64>(elem, 8).unwrap();
    let val = c.deref(hi_ptr).unwrap();
    let ret = c.return_of(val).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(*const Pair, u64) -> i64 = unsafe { compiled.cast() };
    let pairs = [Pair { lo: 1, hi: 2 }, Pair { lo: 3, hi: 4 }, Pair { lo: 5, hi: 6 }];
    assert_eq!(f(pairs.as_ptr(), 2), 6);
}

#[test]
fn s6_precondition() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let guard = c.parameter::<i64>().unwrap();
    let ptr = c.parameter::<Ptr<i64>>().unwrap();
    let zero = c.immediate::<i64>(0).unwrap();
    let cond = c.compare(guard, CmpOp::Ne, zero.node());
    let fallback = c.immediate::<i64>(-1).unwrap();
    c.add_precondition(cond, fallback);
    let val = c.deref(ptr).unwrap();
    let ret = c.return_of(val).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64, *const i64) -> i64 = unsafe { compiled.cast() };

    assert_eq!(f(0, std::ptr::null()), -1, "guard false must skip the dereference entirely");
    let v: i64 = 99;
    assert_eq!(f(1, &v as *const i64), 99);
}

/// A precondition whose guard compares against a dereferenced pointer (so
/// the comparison's rhs storage is `Indirect` over a real allocated base
/// register, not just a frame-relative parameter slot) exercises the
/// `cmp reg, [mem]` encoding directly rather than forcing the rhs into a
/// register first.
#[test]
fn precondition_guard_compares_against_a_dereferenced_pointer() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let threshold_ptr = c.parameter::<Ptr<i64>>().unwrap();
    let threshold = c.deref(threshold_ptr).unwrap();
    let guard = c.parameter::<i64>().unwrap();
    let cond = c.compare(guard, CmpOp::GtS, threshold);
    let fallback = c.immediate::<i64>(-7).unwrap();
    c.add_precondition(cond, fallback);
    let double = c.add(guard, guard).unwrap();
    let ret = c.return_of(double).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64, *const i64) -> i64 = unsafe { compiled.cast() };

    let t: i64 = 10;
    assert_eq!(f(5, &t as *const i64), -7, "guard <= threshold must take the fallback");
    assert_eq!(f(20, &t as *const i64), 40, "guard > threshold must run the main expression");
}

/// A computed (non-leaf) subexpression shared by two different parent
/// binary nodes. `s` is consumed first as `p1`'s left operand (where its
/// register gets reused in place as `p1`'s own destination) and later as
/// `p2`'s left operand again -- if the first consumption clobbered `s`'s
/// cached register instead of copying to a fresh one, `p2` would silently
/// compute using `p1`'s result instead of `s`'s own value.
#[test]
fn shared_computed_subexpression_is_not_clobbered_by_its_first_consumer() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let a = c.parameter::<i64>().unwrap();
    let b = c.parameter::<i64>().unwrap();
    let s = c.add(a, b).unwrap();
    let x = c.parameter::<i64>().unwrap();
    let y = c.parameter::<i64>().unwrap();
    let p1 = c.add(s, x).unwrap();
    let p2 = c.mul(s, y).unwrap();
    let total = c.add(p1, p2).unwrap();
    let ret = c.return_of(total).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64, i64, i64, i64) -> i64 = unsafe { compiled.cast() };

    let (av, bv, xv, yv) = (3, 4, 10, 2);
    let sv = av + bv;
    let expected = (sv + xv) + (sv * yv);
    assert_eq!(f(av, bv, xv, yv), expected);
}

/// A node passed as *both* operands of the same binary op. Exercises the
/// self-aliasing edge case where the left and right storage resolve to the
/// identical register: the result must still be computed correctly and the
/// destination register must survive (not be freed out from under the
/// node's own result as if it were merely a discarded right operand).
#[test]
fn a_node_used_as_both_operands_of_the_same_op() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let a = c.parameter::<i64>().unwrap();
    let doubled = c.add(a, a).unwrap();
    let plus_one = c.add(doubled, c.immediate::<i64>(1).unwrap().node()).unwrap();
    let ret = c.return_of(plus_one).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64) -> i64 = unsafe { compiled.cast() };
    assert_eq!(f(20), 41);
}

/// A pointer parameter shared between a dereference and an independent
/// pointer arithmetic use. Exercises the claim-or-copy rule for `Indirect`
/// nodes: the deref must not steal the parameter's resident register out
/// from under the later `add_ptr` use.
#[test]
fn a_shared_pointer_is_usable_after_being_dereferenced() {
    #[repr(C)]
    struct Pair {
        lo: i64,
        hi: i64,
    }
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let base = c.parameter::<Ptr<Pair>>().unwrap();
    let lo = c.deref(base).unwrap();
    let idx = c.parameter::<u64>().unwrap();
    let elem = c
        .add_ptr(base, idx, std::mem::size_of::<Pair>() as u32)
        .unwrap();
    let hi_ptr = c.field_pointer::<Pair, i64>(elem, 8).unwrap();
    let hi = c.deref(hi_ptr).unwrap();
    let sum = c.add(lo, hi).unwrap();
    let ret = c.return_of(sum).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(*const Pair, u64) -> i64 = unsafe { compiled.cast() };
    let pairs = [Pair { lo: 1, hi: 2 }, Pair { lo: 3, hi: 4 }];
    assert_eq!(f(pairs.as_ptr(), 1), 1 + 4);
}

#[test]
fn subtraction_and_multiplication() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let a = c.parameter::<i64>().unwrap();
    let b = c.parameter::<i64>().unwrap();
    let diff = c.sub(a, b).unwrap();
    let c0 = c.parameter::<i64>().unwrap();
    let product = c.mul(diff, c0).unwrap();
    let ret = c.return_of(product).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64, i64, i64) -> i64 = unsafe { compiled.cast() };
    assert_eq!(f(10, 3, 5), (10 - 3) * 5);
}

#[test]
fn i32_arithmetic_uses_the_32_bit_encoding() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let a = c.parameter::<i32>().unwrap();
    let b = c.parameter::<i32>().unwrap();
    let sum = c.add(a, b).unwrap();
    let ret = c.return_of(sum).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i32, i32) -> i32 = unsafe { compiled.cast() };
    assert_eq!(f(i32::MAX, 1), i32::MAX.wrapping_add(1));
}

/// System V passes only the first six integer-class arguments in registers;
/// the 7th and beyond arrive on the caller's stack. Exercises
/// `Frame::abi_args`'s `AbiArg::Stack` path end to end -- without the
/// prologue copying those slots into the callee's frame, this would read
/// whatever garbage happened to be left on the freshly-reserved stack area.
#[test]
fn eighth_parameter_is_stack_passed_and_still_reads_correctly() {
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let mut params = Vec::new();
    for _ in 0..8 {
        params.push(c.parameter::<i64>().unwrap());
    }
    let mut sum = params[0];
    for &p in &params[1..] {
        sum = c.add(sum, p).unwrap();
    }
    let ret = c.return_of(sum).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64, i64, i64, i64, i64, i64, i64, i64) -> i64 =
        unsafe { compiled.cast() };
    assert_eq!(f(1, 2, 3, 4, 5, 6, 7, 8), 36);
}

/// A balanced binary tree deep enough that its Sethi-Ullman number exceeds
/// the number of allocatable registers, forcing the register allocator to
/// spill at least once during code-gen. Verifies the compiled function
/// still produces the right answer, not just that it compiles.
#[test]
fn deep_balanced_tree_forces_a_spill_and_still_computes_correctly() {
    // A perfectly balanced tree of height H has a Sethi-Ullman number of
    // H + 1; at H = 14 that is 15, past the 13 allocatable GPRs, so the
    // register file must spill at least once during code-gen.
    const DEPTH: u32 = 14;
    let arena = Arena::new();
    let mut c = Compiler::new(&arena);

    fn build<'a>(
        c: &mut Compiler<'a>,
        depth: u32,
        next_value: &mut i64,
    ) -> vesuvius::Node<'a, i64> {
        if depth == 0 {
            let v = *next_value;
            *next_value += 1;
            return c.immediate::<i64>(v).unwrap().node();
        }
        let l = build(c, depth - 1, next_value);
        let r = build(c, depth - 1, next_value);
        c.add(l, r).unwrap()
    }

    let mut next_value = 1i64;
    let root = build(&mut c, DEPTH, &mut next_value);
    let ret = c.return_of(root).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn() -> i64 = unsafe { compiled.cast() };

    let leaves = 1i64 << DEPTH;
    let expected: i64 = (1..=leaves).sum();
    assert_eq!(f(), expected);
}

/// A subtree shared as the *left* operand of many different parent nodes,
/// scattered across a tree deep enough to force repeated spills. Combines
/// the two conditions `code_gen_binary`'s claim-register path needs
/// pressure from at once: `s` still has further parents waiting (so
/// reusing its register as a destination requires `claim_register` to
/// copy into a fresh one rather than reuse in place), and enough other
/// values are simultaneously live that reserving that fresh register can
/// itself provoke a spill. The expected value is computed independently
/// in plain Rust, so this only passes if the compiled function's answer
/// is correct regardless of which registers the allocator happened to
/// pick along the way.
#[test]
fn shared_left_subtree_survives_spilling_register_pressure() {
    const DEPTH: u32 = 12;

    fn build<'a>(
        c: &mut Compiler<'a>,
        depth: u32,
        s: vesuvius::Node<'a, i64>,
        next_value: &mut i64,
    ) -> vesuvius::Node<'a, i64> {
        if depth == 0 {
            let v = *next_value;
            *next_value += 1;
            if v % 3 == 0 {
                return c.add(s, c.immediate::<i64>(v).unwrap().node()).unwrap();
            }
            return c.immediate::<i64>(v).unwrap().node();
        }
        let l = build(c, depth - 1, s, next_value);
        let r = build(c, depth - 1, s, next_value);
        c.add(l, r).unwrap()
    }

    fn expected(depth: u32, s_value: i64, next_value: &mut i64) -> i64 {
        if depth == 0 {
            let v = *next_value;
            *next_value += 1;
            if v % 3 == 0 {
                return s_value + v;
            }
            return v;
        }
        let l = expected(depth - 1, s_value, next_value);
        let r = expected(depth - 1, s_value, next_value);
        l + r
    }

    let arena = Arena::new();
    let mut c = Compiler::new(&arena);
    let sa = c.parameter::<i64>().unwrap();
    let sb = c.parameter::<i64>().unwrap();
    let s = c.add(sa, sb).unwrap();

    let mut next_value = 1i64;
    let root = build(&mut c, DEPTH, s, &mut next_value);
    let ret = c.return_of(root).unwrap();
    let compiled = c.finalize(ret).unwrap();
    let f: extern "C" fn(i64, i64) -> i64 = unsafe { compiled.cast() };

    let (av, bv) = (11i64, 31i64);
    let mut next_value = 1i64;
    let expected_total = expected(DEPTH, av + bv, &mut next_value);
    assert_eq!(f(av, bv), expected_total);
}
