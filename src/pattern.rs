//! OSC 1.0 address pattern matching.
//!
//! The grammar implemented here is the one described by the OSC 1.0 spec's "OSC Address Pattern"
//! and "OSC Address Pattern Matching" sections: `?`, `*`, bracket character classes (with `!`
//! negation and `x-y` ranges), and brace alternation (`{a,b,c}`), matched one slash-delimited part
//! at a time.
//!
//! This is new ground for the crate this one is modeled on — the teacher's [`crate::osc::OSCError`]
//! already carried unused `BadAddressPattern`/`RegexError` variants anticipating this feature; this
//! module completes it by translating each pattern part into an anchored [`regex::Regex`], the same
//! approach used by other OSC address-matching crates in the wild.

use regex::Regex;

/// A pattern compiled once at registration time and reused across every dispatch.
///
/// Parts that turn out to be malformed (an unclosed `[...]`) compile to `None`, which never
/// matches any address part — this implements the OSC 1.0 rule that a malformed pattern yields no
/// match rather than an error.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
	parts: Vec<Option<Regex>>
}

impl CompiledPattern {
	/// Compiles `pattern` once. Matching against this is cheaper than repeated calls to
	/// [`matches`] because the per-part regexes aren't rebuilt on every call.
	pub fn compile(pattern: &str) -> Self {
		let parts = split_parts(pattern)
			.map(|part| translate_part(part).and_then(|body| Regex::new(&format!("^(?:{body})$")).ok()))
			.collect();
		Self { parts }
	}

	/// Returns `true` if `address` matches this compiled pattern.
	pub fn matches(&self, address: &str) -> bool {
		let addr_parts: Vec<&str> = split_parts(address).collect();
		if addr_parts.len() != self.parts.len() {
			return false;
		}
		self.parts.iter().zip(addr_parts).all(|(regex, part)| match regex {
			Some(regex) => regex.is_match(part),
			None => false
		})
	}

	/// Returns `true` if this pattern contains none of the OSC meta characters, meaning it can
	/// only ever match the literal address equal to itself (see [`is_exact`]).
	pub fn is_exact(pattern: &str) -> bool {
		is_exact(pattern)
	}
}

/// Returns `true` if `pattern` matches `address` under OSC 1.0 address pattern matching rules.
///
/// This recompiles the pattern on every call; callers matching the same pattern repeatedly (such
/// as [`crate::address_space::AddressSpace`]) should use [`CompiledPattern`] instead.
///
/// # Examples
///
/// ```
/// use osc_suite::pattern::matches;
///
/// assert!(matches("/eos/*", "/eos/out/active/chan"));
/// assert!(!matches("/eos/*", "/eos/out/active/chan/extra"));
/// assert!(matches("/{a,b}", "/a"));
/// ```
pub fn matches(pattern: &str, address: &str) -> bool {
	CompiledPattern::compile(pattern).matches(address)
}

/// A pattern containing none of `?*[]{}` can only ever match the identical address; callers can
/// use this to fast-path exact registrations straight into a `HashMap` lookup instead of a linear
/// wildcard scan (spec.md §4.4).
pub fn is_exact(pattern: &str) -> bool {
	!pattern.chars().any(|c| matches!(c, '?' | '*' | '[' | ']' | '{' | '}'))
}

fn split_parts(s: &str) -> impl Iterator<Item = &str> {
	s.split('/').filter(|p| !p.is_empty())
}

/// Translates a single `/`-delimited pattern part into the body of a regex (unanchored, to be
/// wrapped by the caller). Returns `None` if the part contains an unclosed `[`.
fn translate_part(part: &str) -> Option<String> {
	let chars: Vec<char> = part.chars().collect();
	let mut out = String::new();
	let mut i = 0;

	while i < chars.len() {
		match chars[i] {
			'?' => {
				out.push('.');
				i += 1;
			}
			'*' => {
				out.push_str(".*");
				i += 1;
			}
			'[' => {
				let close = find_char(&chars, i + 1, ']')?;
				translate_class(&chars[i + 1..close], &mut out);
				i = close + 1;
			}
			'{' => match find_matching_brace(&chars, i) {
				Some(close) => {
					translate_alternation(&chars[i + 1..close], &mut out);
					i = close + 1;
				}
				None => {
					// Malformed (unclosed) brace: fall back to matching the `{` character itself
					// literally, per spec.md §4.3, and keep parsing the remainder of the part.
					out.push_str(&regex::escape("{"));
					i += 1;
				}
			},
			c => {
				out.push_str(&regex::escape(&c.to_string()));
				i += 1;
			}
		}
	}

	Some(out)
}

fn find_char(chars: &[char], from: usize, target: char) -> Option<usize> {
	chars[from..].iter().position(|&c| c == target).map(|p| p + from)
}

/// Finds the index of the `}` matching the `{` at `open`, accounting for (permitted, balanced)
/// nesting. Returns `None` if unbalanced.
fn find_matching_brace(chars: &[char], open: usize) -> Option<usize> {
	let mut depth = 0usize;
	for (idx, &c) in chars.iter().enumerate().skip(open) {
		match c {
			'{' => depth += 1,
			'}' => {
				depth -= 1;
				if depth == 0 {
					return Some(idx);
				}
			}
			_ => {}
		}
	}
	None
}

/// Translates the content of a `[...]` character class (without the brackets) into a regex
/// character class, preserving OSC's range/negation rules, which happen to coincide exactly with
/// regex's own positional rules for `-` once the `!` negation marker is mapped onto regex's `^`.
fn translate_class(content: &[char], out: &mut String) {
	let (negate, body) = match content.first() {
		Some('!') => (true, &content[1..]),
		_ => (false, content)
	};

	if body.is_empty() {
		if negate {
			// `[!]` matches any single character.
			out.push('.');
		} else {
			// `[]` matches nothing: an impossible-to-satisfy class.
			out.push_str("[^\\s\\S]");
		}
		return;
	}

	out.push('[');
	if negate {
		out.push('^');
	}
	for &c in body {
		match c {
			'\\' => out.push_str("\\\\"),
			'^' => out.push_str("\\^"),
			_ => out.push(c)
		}
	}
	out.push(']');
}

/// Translates the content of a `{...}` alternation (without the braces) into a non-capturing
/// regex group of literal alternatives, splitting on top-level commas only (nested braces are
/// part of the literal text of an alternative, not further alternation, per spec.md §4.3).
fn translate_alternation(content: &[char], out: &mut String) {
	let mut alternatives = Vec::new();
	let mut current = String::new();
	let mut depth = 0usize;

	for &c in content {
		match c {
			'{' => {
				depth += 1;
				current.push(c);
			}
			'}' => {
				depth -= 1;
				current.push(c);
			}
			',' if depth == 0 => {
				alternatives.push(std::mem::take(&mut current));
			}
			_ => current.push(c)
		}
	}
	alternatives.push(current);

	out.push_str("(?:");
	out.push_str(&alternatives.iter().map(|alt| regex::escape(alt)).collect::<Vec<_>>().join("|"));
	out.push(')');
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn calibration_table() {
		let cases: &[(&str, &[(&str, bool)])] = &[
			("/?", &[("/a", true), ("/ab", false), ("/A", true), ("/a/b", false)]),
			("/*", &[("/a", true), ("/ab", true), ("/A", true), ("/a/b", false)]),
			("/[a-z]", &[("/a", true), ("/ab", false), ("/A", false), ("/a/b", false)]),
			("/[!a-z]", &[("/a", false), ("/ab", false), ("/A", true), ("/a/b", false)]),
			("/{a,b}", &[("/a", true), ("/ab", false), ("/A", false), ("/a/b", false)]),
			("/*/b", &[("/a", false), ("/ab", false), ("/A", false), ("/a/b", true)])
		];

		for (pattern, expectations) in cases {
			for (address, expected) in *expectations {
				assert_eq!(matches(pattern, address), *expected, "pattern {pattern:?} vs address {address:?}");
			}
		}
	}

	#[test]
	fn no_meta_characters_requires_exact_equality() {
		assert!(is_exact("/eos/out/active/chan"));
		assert!(matches("/eos/out/active/chan", "/eos/out/active/chan"));
		assert!(!matches("/eos/out/active/chan", "/eos/out/active/chanx"));
	}

	#[test]
	fn empty_class_matches_nothing() {
		assert!(!matches("/[]", "/a"));
		assert!(!matches("/[]", "/"));
	}

	#[test]
	fn empty_negated_class_matches_any_single_char() {
		assert!(matches("/[!]", "/a"));
		assert!(!matches("/[!]", "/ab"));
	}

	#[test]
	fn dash_at_edges_of_class_is_literal() {
		assert!(matches("/[-ab]", "/-"));
		assert!(matches("/[ab-]", "/-"));
	}

	#[test]
	fn wildcards_inside_classes_and_braces_are_literal() {
		assert!(matches("/[*?]", "/*"));
		assert!(matches("/[*?]", "/?"));
		assert!(matches("/{a*,b}", "/a*"));
		assert!(!matches("/{a*,b}", "/axyz"));
	}

	#[test]
	fn nested_braces_are_balanced_and_literal() {
		assert!(matches("/{a{b,c}d,e}", "/a{b,c}d"));
		assert!(matches("/{a{b,c}d,e}", "/e"));
	}

	#[test]
	fn unclosed_bracket_never_matches() {
		assert!(!matches("/[abc", "/a"));
		assert!(!matches("/[abc", "/[abc"));
	}

	#[test]
	fn unclosed_brace_falls_back_to_literal() {
		assert!(matches("/{abc", "/{abc"));
		assert!(!matches("/{abc", "/abc"));
	}

	#[test]
	fn star_never_crosses_slash_boundary() {
		assert!(!matches("/*", "/a/b"));
		assert!(matches("/a/*", "/a/b"));
	}

	#[test]
	fn compiled_pattern_matches_same_as_function() {
		let compiled = CompiledPattern::compile("/eos/*");
		assert!(compiled.matches("/eos/out"));
		assert!(!compiled.matches("/other"));
	}
}
