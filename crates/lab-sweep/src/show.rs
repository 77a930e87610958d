use crate::args::Batch;
use crate::launch::display_value;

/// One line per argument set, `"<i>: k=v, ..."`, keys in `ordering` order.
/// Batches get a `Group <n>` header when there is more than one.
pub fn render_batches(batches: &[Batch], ordering: &[String]) -> String {
    let mut out = String::new();
    for (group, sets) in batches.iter().enumerate() {
        if batches.len() > 1 {
            out.push_str(&format!("Group {}\n", group));
        }
        for (i, set) in sets.iter().enumerate() {
            let fields: Vec<String> = ordering
                .iter()
                .filter_map(|k| set.get(k).map(|v| format!("{}={}", k, display_value(v))))
                .collect();
            out.push_str(&format!("{}: {}\n", i, fields.join(", ")));
        }
    }
    out
}
