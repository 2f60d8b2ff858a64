use std::cell::RefCell;
use std::collections::HashMap;

use mkvar::{expand, expand_with, find, Document, VariableProvider};

/// Wraps a provider and counts the lookups made of each name.
struct CountingProvider<P: VariableProvider> {
    inner: P,
    counts: RefCell<HashMap<String, usize>>,
}

impl<P: VariableProvider> CountingProvider<P> {
    fn new(inner: P) -> Self {
        Self {
            inner,
            counts: RefCell::new(HashMap::new()),
        }
    }

    fn count(&self, name: &str) -> usize {
        self.counts.borrow().get(name).copied().unwrap_or(0)
    }
}

impl<P: VariableProvider> VariableProvider for CountingProvider<P> {
    fn lookup(&self, ident: &str) -> Option<String> {
        *self.counts.borrow_mut().entry(ident.to_string()).or_insert(0) += 1;
        self.inner.lookup(ident)
    }
}

#[test]
fn inert_text() {
    let env: HashMap<&str, &str> = HashMap::from([("FOO", "foo")]);
    assert_eq!("src/main.c", expand("FOO = bar", "src/main.c", &env));
    assert_eq!("price: $5", expand("FOO = bar", "price: $$5", &env));
}

#[test]
fn buffer_definition() {
    assert_eq!("bar", expand("FOO = bar", "$(FOO)", &()));
}

#[test]
fn recursive_buffer_definitions() {
    assert_eq!("baz", expand("FOO = $(BAR)\nBAR = baz", "$(FOO)", &()));
}

#[test]
fn self_reference_is_left_literal() {
    assert_eq!("$(FOO)", expand("FOO = $(FOO)", "$(FOO)", &()));
}

#[test]
fn nested_environment_fallback() {
    let env: HashMap<&str, &str> = HashMap::from([("B", "envval")]);
    assert_eq!("envval", expand("A = $(B)", "$(A)", &env));
}

#[test]
fn last_definition_wins() {
    assert_eq!(Some("2".to_string()), find("X = 1\nX = 2", "X"));
}

#[test]
fn continuation_is_collapsed() {
    assert_eq!(Some("ab".to_string()), find("Y = a\\\nb", "Y"));
}

#[test]
fn escaped_reference_is_not_expanded() {
    let env: HashMap<&str, &str> = HashMap::from([("FOO", "foo")]);
    assert_eq!("$(FOO)", expand("", "$$(FOO)", &()));
    assert_eq!("$(FOO)", expand("FOO = bar", "$$(FOO)", &env));
}

#[test]
fn single_letter_form_is_never_expanded() {
    let env: HashMap<&str, &str> = HashMap::from([("X", "env")]);
    assert_eq!("$X", expand("", "$X", &()));
    assert_eq!("$X", expand("X = doc", "$X", &env));
}

#[test]
fn repeated_reference_is_looked_up_once() {
    let vars = CountingProvider::new(HashMap::from([("A", "$(COUNT)$(COUNT)"), ("COUNT", "1")]));
    assert_eq!("11 11", expand_with(&vars, "$(A) $(A)"));
    assert_eq!(1, vars.count("A"));
    assert_eq!(1, vars.count("COUNT"));
}

#[test]
fn buffer_lookups_are_counted_once_too() {
    let document = Document::new("A = $(COUNT)$(COUNT)\nCOUNT = 1\n");
    let doc = CountingProvider::new(document);
    let env = CountingProvider::new(HashMap::from([("UNSET_IN_DOC", "x")]));
    assert_eq!("111x", expand_with(&(&doc, &env), "$(A)$(COUNT)$(UNSET_IN_DOC)"));
    assert_eq!(1, doc.count("COUNT"));
    assert_eq!(1, doc.count("A"));
    assert_eq!(0, env.count("COUNT"));
    assert_eq!(1, env.count("UNSET_IN_DOC"));
}

#[test]
fn undefined_names_are_looked_up_once() {
    let vars = CountingProvider::new(HashMap::<&str, &str>::new());
    assert_eq!("//", expand_with(&vars, "$(NOPE)/$(NOPE)/$(NOPE)"));
    assert_eq!(1, vars.count("NOPE"));
}

#[test]
fn circular_names_are_looked_up_once() {
    let vars = CountingProvider::new(HashMap::from([("A", "$(B)"), ("B", "$(A)")]));
    assert_eq!("$(A) $(A)", expand_with(&vars, "$(A) $(B)"));
    assert_eq!(1, vars.count("A"));
    assert_eq!(1, vars.count("B"));
}

#[test]
fn makefile_snapshot() {
    let makefile = r#"
# Build settings.
PREFIX ?= /usr/local
BINDIR := $(PREFIX)/bin
SRCS = main.c \
       util.c
PREFIX = /opt/mkvar

install:
	cp $(PROG) $(BINDIR)
"#;
    assert_eq!("/opt/mkvar/bin/mkvar", expand(makefile, "$(BINDIR)/mkvar", &()));
    assert_eq!("main.c        util.c", expand(makefile, "$(SRCS)", &()));
    assert_eq!(
        vec!["PREFIX", "BINDIR", "SRCS"],
        Document::new(makefile).definitions()
    );
}
