//! Pipeline interface rules of entry points and the stage restrictions of
//! everything they reach.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    frontend::{
        ast::{self, Attribute, AttributeKind, DeclarationId, PipelineStage},
        lexer::Span,
    },
    middle::{
        builtin::BuiltinValue,
        program::GlobalKind,
        ty::{AccessMode, AddressSpace, ScalarKind, TypeId, TypeKind},
    },
};

use super::Resolver;

/// Builtins and locations already used on one side of an entry point
#[derive(Debug, Default)]
struct Interface {
    input: bool,
    builtins: BTreeMap<BuiltinValue, Span>,
    locations: BTreeMap<u32, Span>,
}

impl Interface {
    fn direction(&self) -> &'static str {
        if self.input { "inputs" } else { "outputs" }
    }
}

impl<'a> Resolver<'a> {
    pub(super) fn validate_entry_points(&mut self) {
        let module = self.module;

        for (id, function) in module.functions() {
            let Some(stage) = self.info.functions.get(&id).map(|info| info.stage) else {
                continue;
            };

            match stage {
                Some(stage) => {
                    self.validate_interface(id, function, stage);
                    self.validate_stage_usage(id, function, stage);
                }
                None => self.reject_io_attributes(function),
            }
        }
    }

    fn reject_io_attributes(&mut self, function: &ast::Function) {
        let attributes = function
            .parameters
            .iter()
            .flat_map(|parameter| &parameter.attributes)
            .chain(&function.return_attributes);

        for attribute in attributes {
            resolve_error!(
                self,
                attribute.span,
                "@{} is only valid on entry point parameters and return values",
                attribute.kind.name()
            );
        }
    }

    fn validate_interface(&mut self, id: DeclarationId, function: &'a ast::Function, stage: PipelineStage) {
        let Some(info) = self.info.functions.get(&id) else {
            return;
        };

        let (parameters, return_type) = (info.parameters.clone(), info.return_type);

        let mut inputs = Interface {
            input: true,
            ..Interface::default()
        };

        for (parameter, ty) in function.parameters.iter().zip(parameters) {
            self.check_io_value(&parameter.attributes, ty, stage, parameter.span, &mut inputs);
        }

        let mut outputs = Interface::default();

        match return_type {
            Some(_) if stage == PipelineStage::Compute => {
                resolve_error!(
                    self,
                    function.name.span,
                    "compute entry point '{}' cannot return a value",
                    self.module.name(function.name)
                );
                return;
            }
            Some(ty) => {
                let span = function
                    .return_type
                    .map(|ty| self.module.type_expression(ty).span)
                    .unwrap_or(function.name.span);

                self.check_io_value(&function.return_attributes, ty, stage, span, &mut outputs);
            }
            None => {}
        }

        if stage == PipelineStage::Vertex && !outputs.builtins.contains_key(&BuiltinValue::Position) {
            resolve_error!(
                self,
                function.name.span,
                "vertex entry point '{}' must return a @builtin(position) value",
                self.module.name(function.name)
            );
        }
    }

    /// A parameter or return value. Structs are checked member by member.
    fn check_io_value(
        &mut self,
        attributes: &'a [Attribute],
        ty: TypeId,
        stage: PipelineStage,
        span: Span,
        interface: &mut Interface,
    ) {
        let module = self.module;

        let TypeKind::Struct(structure) = self.types.get(ty) else {
            self.check_io_attributes(attributes, ty, stage, span, interface);
            return;
        };

        let (declaration, member_types) = (
            structure.declaration,
            structure.members.iter().map(|member| member.ty).collect::<Vec<_>>(),
        );

        if let Some(attribute) = attributes.first() {
            resolve_error!(
                self,
                attribute.span,
                "@{} is not valid on a struct used as an entry point {}",
                attribute.kind.name(),
                if interface.input { "parameter" } else { "return type" }
            );
        }

        let Some(members) = module.declaration(declaration).as_struct().map(|s| &s.members) else {
            return;
        };

        for (member, ty) in members.iter().zip(member_types) {
            if matches!(self.types.get(ty), TypeKind::Struct(_)) {
                resolve_error!(self, member.span, "nested structures cannot be used for entry point IO");
                continue;
            }

            self.check_io_attributes(&member.attributes, ty, stage, member.span, interface);
        }
    }

    fn check_io_attributes(
        &mut self,
        attributes: &[Attribute],
        ty: TypeId,
        stage: PipelineStage,
        span: Span,
        interface: &mut Interface,
    ) {
        let module = self.module;

        let mut builtin = None;
        let mut location = None;
        let mut flat = false;
        let mut interpolate = None;
        let mut invariant = None;

        for attribute in attributes {
            match attribute.kind {
                AttributeKind::Builtin(name) => match module.name(name).parse::<BuiltinValue>() {
                    Ok(value) => builtin = Some((value, attribute.span)),
                    Err(_) => {
                        resolve_error!(self, name.span, "unknown builtin value '{}'", module.name(name));
                        return;
                    }
                },
                AttributeKind::Location(expression) => match self.const_u32(expression, "location") {
                    Some(value) => location = Some((value, attribute.span)),
                    None => return,
                },
                AttributeKind::Interpolate { kind, sampling } => {
                    let kind_name = module.name(kind);

                    if !matches!(kind_name, "perspective" | "linear" | "flat") {
                        resolve_error!(self, kind.span, "invalid interpolation type '{kind_name}'");
                    }

                    if let Some(sampling) = sampling {
                        let sampling_name = module.name(sampling);

                        if kind_name == "flat" || !matches!(sampling_name, "center" | "centroid" | "sample") {
                            resolve_error!(self, sampling.span, "invalid interpolation sampling '{sampling_name}'");
                        }
                    }

                    flat = kind_name == "flat";
                    interpolate = Some(attribute.span);
                }
                AttributeKind::Invariant => invariant = Some(attribute.span),
                ref other => {
                    resolve_error!(self, attribute.span, "@{} is not valid on entry point IO", other.name());
                }
            }
        }

        match (builtin, location) {
            (Some(_), Some((_, location_span))) => {
                resolve_error!(self, location_span, "@builtin and @location cannot be used together");
            }
            (Some((value, builtin_span)), None) => {
                if !value.is_valid_for(stage, interface.input) {
                    resolve_error!(
                        self,
                        builtin_span,
                        "@builtin({value}) is not valid as a {stage} shader {}",
                        if interface.input { "input" } else { "output" }
                    );
                }

                let expected = value.ty(&mut self.types);
                if ty != expected {
                    resolve_error!(
                        self,
                        span,
                        "@builtin({value}) must have type '{}', found '{}'",
                        self.types.name(expected),
                        self.types.name(ty)
                    );
                }

                if let Some(interpolate) = interpolate {
                    resolve_error!(self, interpolate, "@interpolate is only valid on @location values");
                }

                if value != BuiltinValue::Position {
                    if let Some(invariant) = invariant {
                        resolve_error!(self, invariant, "@invariant is only valid on @builtin(position)");
                    }
                }

                if let Some(previous) = interface.builtins.insert(value, builtin_span) {
                    self.error_with_note(
                        builtin_span,
                        format!("@builtin({value}) appears more than once in the entry point {}", interface.direction()),
                        previous,
                        "previously used here",
                    );
                }
            }
            (None, Some((value, location_span))) => {
                if stage == PipelineStage::Compute {
                    resolve_error!(self, location_span, "@location is not valid in compute shaders");
                    return;
                }

                if let Some(invariant) = invariant {
                    resolve_error!(self, invariant, "@invariant is only valid on @builtin(position)");
                }

                match self.types.scalar_or_vector_parts(ty) {
                    Some((_, scalar)) if scalar != ScalarKind::Bool && !scalar.is_abstract() => {
                        let interpolated = (stage == PipelineStage::Vertex && !interface.input)
                            || (stage == PipelineStage::Fragment && interface.input);

                        if scalar.is_integer() && interpolated && !flat {
                            resolve_error!(
                                self,
                                span,
                                "integral user-defined {} must be decorated with @interpolate(flat)",
                                if interface.input { "inputs" } else { "outputs" }
                            );
                        }
                    }
                    _ => {
                        resolve_error!(
                            self,
                            span,
                            "@location value must be a numeric scalar or vector, found '{}'",
                            self.types.name(ty)
                        );
                    }
                }

                if let Some(previous) = interface.locations.insert(value, location_span) {
                    self.error_with_note(
                        location_span,
                        format!("@location({value}) is used more than once in the entry point {}", interface.direction()),
                        previous,
                        "previously used here",
                    );
                }
            }
            (None, None) => {
                resolve_error!(
                    self,
                    span,
                    "missing entry point IO attribute: each parameter and return value needs @builtin or @location"
                );
            }
        }
    }

    /// Checks what the entry point and the functions it calls may use in
    /// `stage`
    fn validate_stage_usage(&mut self, id: DeclarationId, function: &ast::Function, stage: PipelineStage) {
        let Some(info) = self.info.functions.get(&id) else {
            return;
        };

        let reached = std::iter::once(id)
            .chain(info.transitive_calls.iter().copied())
            .collect::<Vec<_>>();
        let globals = info.transitive_globals.clone();

        let mut builtin_misuse = Vec::new();
        let mut discards = Vec::new();

        for callee in &reached {
            let Some(info) = self.info.functions.get(callee) else {
                continue;
            };

            for (builtin, span) in &info.builtin_calls {
                match builtin.stage_restriction() {
                    Some(required) if required != stage => builtin_misuse.push((*builtin, *span, required)),
                    _ => {}
                }
            }

            if stage != PipelineStage::Fragment {
                discards.extend(info.discards.iter().copied());
            }
        }

        let entry_point = self.module.name(function.name);
        let mut reported = BTreeSet::new();

        for (builtin, span, required) in builtin_misuse {
            if reported.insert((span.start, span.end)) {
                self.error_with_note(
                    span,
                    format!("'{}' can only be used in {required} shaders", builtin.name()),
                    function.name.span,
                    format!("called from {stage} entry point '{entry_point}'"),
                );
            }
        }

        for span in discards {
            if reported.insert((span.start, span.end)) {
                self.error_with_note(
                    span,
                    "discard statement is only valid in fragment shaders".to_string(),
                    function.name.span,
                    format!("reached from {stage} entry point '{entry_point}'"),
                );
            }
        }

        for global in globals {
            let Some(GlobalKind::Var { space, access }) = self.info.globals.get(&global).map(|info| info.kind) else {
                continue;
            };

            let name = self.declaration_name(global);
            let declared = self.module.declaration(global).span;

            if space == AddressSpace::Workgroup && stage != PipelineStage::Compute {
                self.error_with_note(
                    function.name.span,
                    format!("workgroup variable '{name}' can only be used in compute shaders"),
                    declared,
                    format!("'{name}' declared here"),
                );
            }

            if space == AddressSpace::Storage && access == AccessMode::ReadWrite && stage == PipelineStage::Vertex {
                self.error_with_note(
                    function.name.span,
                    format!("vertex entry point '{entry_point}' cannot use read_write storage variable '{name}'"),
                    declared,
                    format!("'{name}' declared here"),
                );
            }
        }
    }
}
