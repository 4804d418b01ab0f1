/// Derive a post id from its title: lowercase letters and digits, with spaces and hyphens folded
/// into single hyphens. Any other character is dropped.
///
/// eg. `"  Hello, World -- Tour 2024! "` becomes `"hello-world-tour-2024"`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.trim().to_lowercase().chars() {
        match c {
            'a'..='z' | '0'..='9' => slug.push(c),
            ' ' | '-' => {
                if !slug.is_empty() && !slug.ends_with('-') {
                    slug.push('-');
                }
            }
            _ => {}
        }
    }
    slug.trim_matches('-').to_string()
}
