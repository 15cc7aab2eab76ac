use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\[(.*?)\]").expect("valid regex"))
}

/// Unique `[Name]` placeholders in order of first appearance.
pub fn find_placeholders(template: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for caps in placeholder_regex().captures_iter(template) {
        let name = &caps[1];
        if !found.iter().any(|f| f == name) {
            found.push(name.to_string());
        }
    }
    found
}

/// Substitutes every combination of example values into `template`, at most `limit` results.
///
/// Combinations follow placeholder order with the last placeholder varying
/// fastest. A placeholder without examples yields no questions.
pub fn generate_permutations(
    template: &str,
    examples: &HashMap<String, Vec<String>>,
    limit: usize,
) -> Vec<String> {
    let placeholders = find_placeholders(template);
    if placeholders.is_empty() {
        return vec![template.to_string()];
    }

    let mut value_lists: Vec<&[String]> = Vec::with_capacity(placeholders.len());
    for name in &placeholders {
        match examples.get(name).filter(|values| !values.is_empty()) {
            Some(values) => value_lists.push(values.as_slice()),
            None => {
                tracing::warn!(
                    "No examples fetched or found for placeholder '[{}]' in template '{}'. Skipping permutations for this template.",
                    name,
                    template
                );
                return Vec::new();
            }
        }
    }

    let mut generated = Vec::new();
    let mut indices = vec![0usize; value_lists.len()];
    loop {
        if generated.len() >= limit {
            tracing::info!(
                "Limit of {} permutations reached for template: '{}...'",
                limit,
                template.chars().take(50).collect::<String>()
            );
            break;
        }

        let mut question = template.to_string();
        for (name, (values, &i)) in placeholders.iter().zip(value_lists.iter().zip(&indices)) {
            question = question.replace(&format!("[{}]", name), &values[i]);
        }
        generated.push(question);

        if !advance(&mut indices, &value_lists) {
            break;
        }
    }
    generated
}

/// Odometer step over the index vector; false once every combination was visited.
fn advance(indices: &mut [usize], lists: &[&[String]]) -> bool {
    for pos in (0..indices.len()).rev() {
        indices[pos] += 1;
        if indices[pos] < lists[pos].len() {
            return true;
        }
        indices[pos] = 0;
    }
    false
}
