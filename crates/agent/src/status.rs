//! STATUS command response assembly.

use crate::runtime::HeapInfo;
use crate::slots::{SlotState, SlotTable};

pub async fn build_status_line(table: &SlotTable, heap: HeapInfo, low_stack_threshold: u64) -> String {
    let mut modules = Vec::new();
    let mut low_stack = Vec::new();

    for slot in &table.slots {
        let inner = slot.inner.lock().await;
        if !inner.used {
            continue;
        }
        let module_id = inner.module_id.clone().unwrap_or_default();
        let state = match inner.state {
            SlotState::Empty => "EMPTY",
            SlotState::Loaded => "LOADED",
            SlotState::Running => "RUNNING",
        };
        let wasm_bytes = inner.bytecode.as_ref().map(|b| b.len()).unwrap_or(0);
        let stack_free = heap.free.saturating_sub(inner.alloc_high_water as u32);
        modules.push(format!(
            "{}:{}:wasm={}:stack_free={}",
            module_id, state, wasm_bytes, stack_free
        ));
        if (stack_free as u64) < low_stack_threshold {
            low_stack.push(module_id);
        }
    }

    let modules_csv = if modules.is_empty() {
        "none".to_string()
    } else {
        modules.join(",")
    };
    let low_stack_csv = if low_stack.is_empty() {
        "none".to_string()
    } else {
        low_stack.join(",")
    };

    format!(
        "STATUS_OK modules=\"{}\" low_stack=\"{}\" wamr_total={} wamr_free={} wamr_used={} wamr_highmark={}",
        modules_csv, low_stack_csv, heap.total, heap.free, heap.used, heap.highmark
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_table_reports_modules_none() {
        let table = SlotTable::new(2);
        let heap = HeapInfo {
            total: 100,
            free: 100,
            used: 0,
            highmark: 0,
        };
        let line = build_status_line(&table, heap, 512).await;
        assert!(line.contains("modules=\"none\""));
        assert!(line.contains("low_stack=\"none\""));
    }

    #[tokio::test]
    async fn loaded_slot_appears_in_modules_csv() {
        let table = SlotTable::new(2);
        let slot = table.find_free().await.unwrap();
        {
            let mut inner = slot.inner.lock().await;
            inner.used = true;
            inner.module_id = Some("m1".to_string());
            inner.state = SlotState::Loaded;
            inner.bytecode = Some(vec![0u8; 64]);
        }
        let heap = HeapInfo {
            total: 1000,
            free: 1000,
            used: 0,
            highmark: 0,
        };
        let line = build_status_line(&table, heap, 512).await;
        assert!(line.contains("m1:LOADED:wasm=64"));
    }
}
