//! Ruleset markdown parsing.

/// The four recognised sections of a tenant ruleset. Unrecognised headings
/// and their content are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ruleset {
    pub prompt_context: Option<String>,
    pub review_modifications: Option<String>,
    pub rejection_rules: Option<String>,
    pub quality_gates: Option<String>,
}

impl Ruleset {
    /// True when no section carries content — the engine then skips every
    /// LLM pass.
    pub fn is_empty(&self) -> bool {
        self.prompt_context.is_none()
            && self.review_modifications.is_none()
            && self.rejection_rules.is_none()
            && self.quality_gates.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    PromptContext,
    ReviewModifications,
    RejectionRules,
    QualityGates,
}

/// Parse a ruleset document. Sections are matched by top-level heading text,
/// case-insensitively; content runs until the next top-level heading.
pub fn parse_ruleset(markdown: &str) -> Ruleset {
    let mut ruleset = Ruleset::default();
    let mut current: Option<Section> = None;
    let mut buffer = String::new();

    let mut flush = |section: Option<Section>, buffer: &mut String, ruleset: &mut Ruleset| {
        let content = buffer.trim().to_string();
        buffer.clear();
        if content.is_empty() {
            return;
        }
        match section {
            Some(Section::PromptContext) => ruleset.prompt_context = Some(content),
            Some(Section::ReviewModifications) => ruleset.review_modifications = Some(content),
            Some(Section::RejectionRules) => ruleset.rejection_rules = Some(content),
            Some(Section::QualityGates) => ruleset.quality_gates = Some(content),
            None => {}
        }
    };

    for line in markdown.lines() {
        if let Some(heading) = top_level_heading(line) {
            flush(current, &mut buffer, &mut ruleset);
            current = match_section(heading);
        } else if current.is_some() {
            buffer.push_str(line);
            buffer.push('\n');
        }
    }
    flush(current, &mut buffer, &mut ruleset);

    ruleset
}

/// `# Heading` or `## Heading` text; deeper levels stay inside the section.
fn top_level_heading(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if (1..=2).contains(&hashes) && trimmed.as_bytes().get(hashes) == Some(&b' ') {
        Some(trimmed[hashes..].trim())
    } else {
        None
    }
}

fn match_section(heading: &str) -> Option<Section> {
    let normalised = heading.trim().to_uppercase().replace(' ', "_");
    match normalised.as_str() {
        "PROMPT_CONTEXT" => Some(Section::PromptContext),
        "REVIEW_MODIFICATIONS" => Some(Section::ReviewModifications),
        "REJECTION_RULES" => Some(Section::RejectionRules),
        "QUALITY_GATES" => Some(Section::QualityGates),
        _ => None,
    }
}
