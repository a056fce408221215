//! HTML → markdown rendering for item bodies.
//!
//! Rendering is best-effort: [`render`] never fails. If conversion does fail
//! (currently only on pathologically deep nesting) the raw payload is
//! returned unchanged so the item still syncs.
//!
//! Handled markup:
//!
//! | HTML | Markdown |
//! |------|----------|
//! | `h1`–`h6` | `#` … `######` |
//! | `p`, `div`, `section`, … | blank-line separated blocks |
//! | `strong`/`b`, `em`/`i` | `**…**`, `*…*` |
//! | `a`, `img` | `[text](href)`, `![alt](src)` |
//! | `ul`/`ol`/`li` | `-` / `1.` lists, nested by indent |
//! | `blockquote` | `> ` prefixed lines |
//! | `pre`, `code` | fenced block, backticks |
//! | `script`, `style`, comments | dropped |

use scraper::{ElementRef, Html, Node};

/// Nesting beyond this depth is treated as a conversion failure.
const MAX_DEPTH: usize = 256;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("markup nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Render an HTML body as markdown, falling back to the raw input.
pub fn render(raw: &str) -> String {
    match to_markdown(raw) {
        Ok(text) => text,
        Err(err) => {
            tracing::debug!(error = %err, "markdown conversion failed, using raw content");
            raw.to_string()
        }
    }
}

/// Decode entities and strip tags from a title.
pub fn render_title(raw: &str) -> String {
    let fragment = Html::parse_fragment(raw);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn to_markdown(raw: &str) -> Result<String, TransformError> {
    let fragment = Html::parse_fragment(raw);
    let mut writer = MarkdownWriter::default();
    writer.children(fragment.root_element(), 0)?;
    Ok(writer.finish())
}

#[derive(Clone, Copy)]
enum ListKind {
    Unordered,
    Ordered(usize),
}

#[derive(Default)]
struct MarkdownWriter {
    out: String,
    lists: Vec<ListKind>,
    pre: usize,
    pending_space: bool,
}

impl MarkdownWriter {
    fn children(&mut self, element: ElementRef<'_>, depth: usize) -> Result<(), TransformError> {
        if depth > MAX_DEPTH {
            return Err(TransformError::TooDeep(MAX_DEPTH));
        }
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.text(text),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.element(el, depth + 1)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn element(&mut self, el: ElementRef<'_>, depth: usize) -> Result<(), TransformError> {
        let name = el.value().name();
        match name {
            "script" | "style" | "noscript" | "template" | "head" => {}
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                self.block_break();
                self.out.push_str(&"#".repeat(level));
                self.out.push(' ');
                self.children(el, depth)?;
                self.block_break();
            }
            "p" | "div" | "section" | "article" | "header" | "footer" | "figure" | "main"
            | "aside" | "nav" | "table" | "dl" => {
                self.block_break();
                self.children(el, depth)?;
                self.block_break();
            }
            "figcaption" | "tr" | "dt" | "dd" => {
                self.line_break();
                self.children(el, depth)?;
                self.line_break();
            }
            "td" | "th" => {
                self.inline("| ");
                self.children(el, depth)?;
                self.pending_space = true;
            }
            "br" => {
                self.out.push('\n');
                self.pending_space = false;
            }
            "hr" => {
                self.block_break();
                self.out.push_str("---");
                self.block_break();
            }
            "strong" | "b" => self.wrap_inline(el, depth, "**")?,
            "em" | "i" => self.wrap_inline(el, depth, "*")?,
            "del" | "s" => self.wrap_inline(el, depth, "~~")?,
            "code" if self.pre == 0 => self.wrap_inline(el, depth, "`")?,
            "a" => match el.value().attr("href") {
                Some(href) if !href.is_empty() => {
                    self.inline("[");
                    self.children(el, depth)?;
                    self.out.push_str("](");
                    self.out.push_str(href);
                    self.out.push(')');
                }
                _ => self.children(el, depth)?,
            },
            "img" => {
                if let Some(src) = el.value().attr("src") {
                    let alt = el.value().attr("alt").unwrap_or("");
                    self.inline(&format!("![{}]({})", alt, src));
                }
            }
            "ul" | "ol" => {
                let kind = if name == "ol" {
                    ListKind::Ordered(0)
                } else {
                    ListKind::Unordered
                };
                if self.lists.is_empty() {
                    self.block_break();
                } else {
                    self.line_break();
                }
                self.lists.push(kind);
                self.children(el, depth)?;
                self.lists.pop();
                if self.lists.is_empty() {
                    self.block_break();
                } else {
                    self.line_break();
                }
            }
            "li" => {
                self.line_break();
                let indent = "  ".repeat(self.lists.len().saturating_sub(1));
                let marker = match self.lists.last_mut() {
                    Some(ListKind::Ordered(n)) => {
                        *n += 1;
                        format!("{}. ", n)
                    }
                    _ => "- ".to_string(),
                };
                self.out.push_str(&indent);
                self.out.push_str(&marker);
                self.pending_space = false;
                self.children(el, depth)?;
                self.line_break();
            }
            "blockquote" => {
                let mut inner = MarkdownWriter::default();
                inner.children(el, depth)?;
                let quoted = inner.finish();
                self.block_break();
                for line in quoted.lines() {
                    if line.is_empty() {
                        self.out.push_str(">\n");
                    } else {
                        self.out.push_str("> ");
                        self.out.push_str(line);
                        self.out.push('\n');
                    }
                }
                self.block_break();
            }
            "pre" => {
                self.block_break();
                self.out.push_str("```\n");
                self.pre += 1;
                self.children(el, depth)?;
                self.pre -= 1;
                if !self.out.ends_with('\n') {
                    self.out.push('\n');
                }
                self.out.push_str("```");
                self.block_break();
            }
            _ => self.children(el, depth)?,
        }
        Ok(())
    }

    fn wrap_inline(
        &mut self,
        el: ElementRef<'_>,
        depth: usize,
        marker: &str,
    ) -> Result<(), TransformError> {
        self.inline(marker);
        self.children(el, depth)?;
        self.out.push_str(marker);
        Ok(())
    }

    fn text(&mut self, text: &str) {
        if self.pre > 0 {
            self.out.push_str(text);
            return;
        }
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            if !text.is_empty() {
                self.pending_space = true;
            }
            return;
        }
        if text.starts_with(char::is_whitespace) {
            self.pending_space = true;
        }
        self.inline(&words.join(" "));
        self.pending_space = text.ends_with(char::is_whitespace);
    }

    /// Append inline content, emitting a pending separator space first.
    fn inline(&mut self, s: &str) {
        if self.pending_space && !self.out.is_empty() && !self.out.ends_with(char::is_whitespace)
        {
            self.out.push(' ');
        }
        self.pending_space = false;
        self.out.push_str(s);
    }

    fn line_break(&mut self) {
        self.pending_space = false;
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
    }

    fn block_break(&mut self) {
        self.pending_space = false;
        if self.out.is_empty() {
            return;
        }
        while !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn finish(self) -> String {
        let mut result = String::with_capacity(self.out.len());
        let mut blank_run = 0;
        for line in self.out.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            result.push_str(line);
            result.push('\n');
        }
        result.trim().to_string()
    }
}
