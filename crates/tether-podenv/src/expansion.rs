//! `$(VAR)` expansion for container command lines and environment values.
//!
//! The syntax is Kubernetes', not the shell's: the only reference
//! delimiter is `$(NAME)`, a literal dollar sign is written `$$`, and a `$`
//! followed by anything else (or nothing) passes through unchanged. An
//! unterminated `$(` passes through as written. Replacements are inserted
//! as-is and never re-expanded, so references cannot recurse.
//!
//! Expansion is total: it never fails. Policy for undefined names lives in
//! the mapping function — the pipeline's convention is to return the
//! reference itself (`$(NAME)`) so unresolvable references stay visible in
//! the materialized value.

/// Expand every well-formed `$(NAME)` reference in `input` using `mapping`.
pub fn expand(input: &str, mapping: impl Fn(&str) -> String) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        match after.chars().next() {
            // Trailing operator: nothing follows, pass it through.
            None => {
                out.push('$');
                rest = "";
            }
            // Escaped operator.
            Some('$') => {
                out.push('$');
                rest = &after[1..];
            }
            Some('(') => match after.find(')') {
                Some(close) => {
                    out.push_str(&mapping(&after[1..close]));
                    rest = &after[close + 1..];
                }
                // Unterminated reference: emit the "$(" and keep scanning
                // after the opener.
                None => {
                    out.push_str("$(");
                    rest = &after[1..];
                }
            },
            // An operator that does not begin a reference.
            Some(c) => {
                out.push('$');
                out.push(c);
                rest = &after[c.len_utf8()..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// The conventional fallback for undefined names: the reference itself,
/// re-wrapped in the expansion syntax.
pub fn syntax_wrap(name: &str) -> String {
    format!("$({})", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn mapping_for(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> String {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| match map.get(name) {
            Some(v) => (*v).to_string(),
            None => syntax_wrap(name),
        }
    }

    #[test]
    fn expands_simple_references() {
        let f = mapping_for(&[("VAR_A", "A"), ("VAR_B", "B")]);
        assert_eq!(expand("$(VAR_A)", &f), "A");
        assert_eq!(expand("___$(VAR_B)___", &f), "___B___");
        assert_eq!(expand("$(VAR_A)$(VAR_B)", &f), "AB");
        assert_eq!(expand("foo$(VAR_A)bar$(VAR_B)baz", &f), "fooAbarBbaz");
    }

    #[test]
    fn undefined_references_stay_in_place() {
        let f = mapping_for(&[("VAR_A", "A")]);
        assert_eq!(expand("$(MISSING)", &f), "$(MISSING)");
        assert_eq!(expand("$(VAR_A)$(MISSING)", &f), "A$(MISSING)");
    }

    #[test]
    fn double_operator_escapes() {
        let f = mapping_for(&[("VAR_A", "A")]);
        assert_eq!(expand("$$", &f), "$");
        assert_eq!(expand("$$(VAR_A)", &f), "$(VAR_A)");
        assert_eq!(expand("$$$(VAR_A)", &f), "$A");
        assert_eq!(expand("foo$$bar", &f), "foo$bar");
    }

    #[test]
    fn lone_operators_pass_through() {
        let f = mapping_for(&[("VAR_A", "A")]);
        assert_eq!(expand("$", &f), "$");
        assert_eq!(expand("foo$", &f), "foo$");
        assert_eq!(expand("$VAR_A", &f), "$VAR_A");
        assert_eq!(expand("$ (VAR_A)", &f), "$ (VAR_A)");
    }

    #[test]
    fn unterminated_references_pass_through() {
        let f = mapping_for(&[("VAR_A", "A")]);
        assert_eq!(expand("$(", &f), "$(");
        assert_eq!(expand("$(VAR_A", &f), "$(VAR_A");
        assert_eq!(expand("foo$(bar", &f), "foo$(bar");
    }

    #[test]
    fn inner_opener_is_part_of_the_name() {
        // The scan runs to the first closer, so "$($(VAR_A)" reads the name
        // "$(VAR_A" — which is undefined and therefore stays wrapped.
        let f = mapping_for(&[("VAR_A", "A")]);
        assert_eq!(expand("$($(VAR_A))", &f), "$($(VAR_A))");
    }

    #[test]
    fn replacements_are_not_re_expanded() {
        // FOO resolves to a string that itself looks like a reference;
        // the result is inserted verbatim.
        let f = mapping_for(&[("FOO", "$(BAR)"), ("BAR", "bar_value")]);
        assert_eq!(expand("$(FOO)", &f), "$(BAR)");
    }

    #[test]
    fn empty_input_and_empty_name() {
        let f = mapping_for(&[]);
        assert_eq!(expand("", &f), "");
        // "$()" is a well-formed reference with an empty name.
        assert_eq!(expand("$()", &f), "$()");
    }

    #[test]
    fn expansion_is_total_over_plain_text() {
        let f = mapping_for(&[]);
        assert_eq!(expand("no references here", &f), "no references here");
        assert_eq!(expand("100% plain (text)", &f), "100% plain (text)");
    }
}
