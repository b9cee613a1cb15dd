use super::ToolCall;

/// Merge native and bracket-recovered calls into the final list.
///
/// Two calls are the same call when both carry an id and the ids match, or
/// when name and arguments are equal. An id match keeps the first-seen
/// position but adopts the longer argument string. Native calls come first.
/// Applying the result again yields the same list.
#[must_use]
pub fn dedupe_tool_calls(native: Vec<ToolCall>, bracket: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut calls: Vec<ToolCall> = native.into_iter().chain(bracket).collect();
    loop {
        let before = calls.len();
        calls = dedupe_pass(calls);
        if calls.len() == before {
            return calls;
        }
    }
}

fn dedupe_pass(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut out: Vec<ToolCall> = Vec::with_capacity(calls.len());
    for call in calls {
        if let Some(existing) = out.iter_mut().find(|seen| same_id(seen, &call)) {
            if call.arguments.len() > existing.arguments.len() {
                existing.arguments = call.arguments;
            }
            continue;
        }
        if out
            .iter()
            .any(|seen| seen.name == call.name && seen.arguments == call.arguments)
        {
            continue;
        }
        out.push(call);
    }
    out
}

fn same_id(a: &ToolCall, b: &ToolCall) -> bool {
    matches!((&a.id, &b.id), (Some(x), Some(y)) if x == y)
}
