use super::*;

fn questions(memory: &ConversationMemory) -> Vec<&str> {
    memory
        .render()
        .into_iter()
        .map(|turn| turn.question.as_str())
        .collect()
}

#[test]
fn render_returns_turns_in_append_order() {
    let mut memory = ConversationMemory::new(0);
    memory.append(Turn::new("T1", "A1"));
    memory.append(Turn::new("T2", "A2"));
    memory.append(Turn::new("T3", "A3"));

    assert_eq!(questions(&memory), vec!["T1", "T2", "T3"]);
    assert_eq!(memory.render()[1].answer, "A2");
}

#[test]
fn unbounded_memory_keeps_everything() {
    let mut memory = ConversationMemory::new(0);
    for i in 0..100 {
        memory.append(Turn::new(format!("Q{i}"), "A"));
    }
    assert_eq!(memory.len(), 100);
}

#[test]
fn bounded_memory_drops_oldest() {
    let mut memory = ConversationMemory::new(2);
    memory.append(Turn::new("T1", "A1"));
    memory.append(Turn::new("T2", "A2"));
    memory.append(Turn::new("T3", "A3"));

    assert_eq!(questions(&memory), vec!["T2", "T3"]);
}

#[test]
fn clear_resets_session() {
    let mut memory = ConversationMemory::default();
    assert!(memory.is_empty());

    memory.append(Turn::new("T1", "A1"));
    assert!(!memory.is_empty());

    memory.clear();
    assert!(memory.is_empty());
    assert!(memory.render().is_empty());
}
