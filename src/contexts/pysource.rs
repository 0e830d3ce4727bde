//! Line-level helpers for editing Python source.
//!
//! These do not parse Python. They track brackets, strings and comments
//! well enough to find where a statement ends and where the leading import
//! block stops, which is all the fallback rewrites need.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenString {
    quote: char,
    triple: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct ScanState {
    depth: i32,
    string: Option<OpenString>,
}

impl ScanState {
    fn continues(&self, line_continues: bool) -> bool {
        self.depth > 0 || self.string.is_some_and(|s| s.triple) || line_continues
    }
}

/// Advances `state` over one physical line.
///
/// Returns true when the line ends with a backslash continuation.
fn scan_line(line: &str, state: &mut ScanState) -> bool {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match state.string {
            Some(open) => {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == open.quote {
                    if !open.triple {
                        state.string = None;
                    } else if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                        state.string = None;
                        i += 3;
                        continue;
                    }
                }
            }
            None => match c {
                '#' => return false,
                '\'' | '"' => {
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    state.string = Some(OpenString { quote: c, triple });
                    if triple {
                        i += 3;
                        continue;
                    }
                }
                '(' | '[' | '{' => state.depth += 1,
                ')' | ']' | '}' => state.depth -= 1,
                _ => {}
            },
        }
        i += 1;
    }

    // Single-quoted strings cannot span lines without a continuation.
    let continued = line.trim_end().ends_with('\\');
    if let Some(open) = state.string {
        if !open.triple && !continued {
            state.string = None;
        }
    }
    continued
}

/// Index of the last physical line of the statement starting at `start`.
pub fn statement_end(lines: &[String], start: usize) -> usize {
    let mut state = ScanState::default();
    let mut idx = start;
    while idx < lines.len() {
        let continued = scan_line(&lines[idx], &mut state);
        if !state.continues(continued) {
            return idx;
        }
        idx += 1;
    }
    lines.len().saturating_sub(1)
}

pub fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

pub fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_docstring_start(trimmed: &str) -> bool {
    let body = trimmed.trim_start_matches(['r', 'R', 'u', 'U']);
    body.starts_with('"') || body.starts_with('\'')
}

/// Line index just past the module docstring and leading imports.
///
/// New imports inserted here land after any `from __future__` import and
/// before the first statement that is not an import.
pub fn leading_block_end(lines: &[String]) -> usize {
    let mut end = 0;
    let mut idx = 0;
    let mut first = true;

    while idx < lines.len() {
        let line = &lines[idx];
        if is_blank_or_comment(line) {
            idx += 1;
            continue;
        }
        if indent_of(line) > 0 {
            break;
        }
        let trimmed = line.trim_start();
        let header = (first && is_docstring_start(trimmed))
            || trimmed.starts_with("import ")
            || trimmed.starts_with("from ");
        if !header {
            break;
        }
        let last = statement_end(lines, idx);
        end = last + 1;
        idx = last + 1;
        first = false;
    }
    end
}

/// The top-level `def` named `name`, as (def line, last line of the body).
pub fn find_function(lines: &[String], name: &str) -> Option<(usize, usize)> {
    let start = lines.iter().position(|line| {
        let rest = line
            .strip_prefix("async def ")
            .or_else(|| line.strip_prefix("def "));
        rest.and_then(|r| r.strip_prefix(name))
            .is_some_and(|r| r.trim_start().starts_with('('))
    })?;

    let signature_end = statement_end(lines, start);
    let mut last = signature_end;
    let mut idx = signature_end + 1;
    while idx < lines.len() {
        let line = &lines[idx];
        if !line.trim().is_empty() && indent_of(line) == 0 && !line.trim_start().starts_with('#') {
            break;
        }
        if !is_blank_or_comment(line) {
            last = statement_end(lines, idx);
            idx = last + 1;
            continue;
        }
        idx += 1;
    }
    Some((start, last))
}
