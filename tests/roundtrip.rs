// Printing an AST back to source and re-parsing it yields the same tree

use rscc::{
    compile, parse,
    printer::{dump_ast, to_source},
    serialize::{decode_ir, encode_ir},
    tokenize,
};

const SOURCES: &[&str] = &[
    "int main(void) { return 0; }",
    r#"int main(void) { printf("a %s\tb\n", "\"q\""); return 0; }"#,
    "int f(int a, int b) { return a - b - (a * b) % 3 / 2; }",
    "int g(int a) { a = a = 1 + 2 * -a; return !a != 0 == (a >= 1); }",
    "void h(int n) { while (n > 0) if (n % 2) n = n - 1; else { n = n / 2; } }",
    "int k(int x);\nint k(int x) { { int y = x; { return y; } } }",
    "int p(char *s) { if (s == \"\") return 1; return 0; }",
];

#[test]
fn test_source_roundtrip() {
    for src in SOURCES {
        let original = parse(&tokenize(src).unwrap()).unwrap();
        let printed = to_source(&original);
        let reparsed = parse(&tokenize(&printed).unwrap())
            .unwrap_or_else(|e| panic!("reparse of {:?} failed: {}", printed, e));
        assert_eq!(dump_ast(&original), dump_ast(&reparsed), "{}", printed);
        assert_eq!(to_source(&reparsed), printed);
    }
}

#[test]
fn test_ir_image_roundtrip() {
    for src in SOURCES {
        let ir = compile(src).unwrap().ir;
        let bytes = encode_ir(&ir).unwrap();
        assert_eq!(decode_ir(&bytes).unwrap(), ir);
    }
}
