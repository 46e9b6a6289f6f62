//! Estado mutable de un pipeline: un slot por campo.
//!
//! Cada mutación es un reemplazo atómico de la referencia del slot, con un
//! contador monotónico que preserva el orden causal de updates sobre un mismo
//! slot. Todas las transiciones ocurren desde el hilo del controller.

use std::collections::BTreeMap;
use uuid::Uuid;

use super::structure::PipelineStructure;

/// Posición nombrada dentro del pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldRef {
    PipelineInput(String),
    StepInput { step_id: String, field: String },
    StepOutput { step_id: String, field: String },
    PipelineOutput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    NotSet,
    Set,
    /// El valor referenciado quedó obsoleto (un upstream cambió).
    Invalid,
}

#[derive(Debug, Clone)]
pub struct ValueSlot {
    pub value_id: Option<Uuid>,
    pub status: SlotStatus,
    pub update_count: u64,
}

impl ValueSlot {
    fn empty() -> Self {
        Self { value_id: None,
               status: SlotStatus::NotSet,
               update_count: 0 }
    }

    pub fn is_set(&self) -> bool {
        self.status == SlotStatus::Set && self.value_id.is_some()
    }
}

pub struct PipelineState {
    slots: BTreeMap<FieldRef, ValueSlot>,
}

impl PipelineState {
    /// Crea un slot vacío por cada campo de la estructura.
    pub fn for_structure(structure: &PipelineStructure) -> Self {
        let mut slots = BTreeMap::new();
        for name in structure.pipeline_inputs.keys() {
            slots.insert(FieldRef::PipelineInput(name.clone()), ValueSlot::empty());
        }
        for step in structure.steps.values() {
            for field in step.inputs_schema.keys() {
                slots.insert(FieldRef::StepInput { step_id: step.step_id.clone(),
                                                   field: field.clone() },
                             ValueSlot::empty());
            }
            for field in step.outputs_schema.keys() {
                slots.insert(FieldRef::StepOutput { step_id: step.step_id.clone(),
                                                    field: field.clone() },
                             ValueSlot::empty());
            }
        }
        for name in structure.pipeline_outputs.keys() {
            slots.insert(FieldRef::PipelineOutput(name.clone()), ValueSlot::empty());
        }
        Self { slots }
    }

    pub fn get(&self, field: &FieldRef) -> &ValueSlot {
        self.slots.get(field).expect("slot exists for every structure field")
    }

    /// Reemplazo atómico del slot. Devuelve `true` si algo cambió.
    pub fn set(&mut self, field: &FieldRef, value_id: Option<Uuid>, status: SlotStatus) -> bool {
        let slot = self.slots.get_mut(field).expect("slot exists for every structure field");
        if slot.value_id == value_id && slot.status == status {
            return false;
        }
        slot.value_id = value_id;
        slot.status = status;
        slot.update_count += 1;
        true
    }

    /// Marca un slot como inválido conservando la referencia vieja.
    pub fn invalidate(&mut self, field: &FieldRef) -> bool {
        let slot = self.slots.get_mut(field).expect("slot exists for every structure field");
        if slot.status != SlotStatus::Set {
            return false;
        }
        slot.status = SlotStatus::Invalid;
        slot.update_count += 1;
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldRef, &ValueSlot)> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_count_is_monotonic() {
        let mut slots = BTreeMap::new();
        slots.insert(FieldRef::PipelineInput("a".to_string()), ValueSlot::empty());
        let mut state = PipelineState { slots };
        let field = FieldRef::PipelineInput("a".to_string());

        let id = Uuid::new_v4();
        assert!(state.set(&field, Some(id), SlotStatus::Set));
        assert_eq!(state.get(&field).update_count, 1);
        // mismo valor y estado: no-op, el contador no avanza
        assert!(!state.set(&field, Some(id), SlotStatus::Set));
        assert_eq!(state.get(&field).update_count, 1);
        assert!(state.invalidate(&field));
        assert_eq!(state.get(&field).update_count, 2);
        assert_eq!(state.get(&field).status, SlotStatus::Invalid);
        // la referencia vieja se conserva al invalidar
        assert_eq!(state.get(&field).value_id, Some(id));
    }
}
