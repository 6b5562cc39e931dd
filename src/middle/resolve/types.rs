//! Resolution of type syntax to interned types

use super::{Binding, Resolver};
use crate::{
    frontend::{
        ast::{DeclarationKind, TemplateArgument, TypeExpressionId},
        lexer::Span,
    },
    middle::{
        program::{EvaluationStage, GlobalKind, LocalKind},
        ty::{
            AccessMode, AddressSpace, ArraySize, SamplerKind, ScalarKind, TexelFormat, TextureDimension, TextureKind,
            TypeId, TypeKind,
        },
    },
};

impl<'a> Resolver<'a> {
    pub(super) fn resolve_type(&mut self, id: TypeExpressionId) -> Option<TypeId> {
        if let Some(ty) = self.info.type_expressions.get(&id) {
            return Some(*ty);
        }

        let ty = self.resolve_type_expression(id)?;
        self.info.type_expressions.insert(id, ty);

        Some(ty)
    }

    fn resolve_type_expression(&mut self, id: TypeExpressionId) -> Option<TypeId> {
        let module = self.module;
        let expression = module.type_expression(id);
        let name = module.name(expression.name);

        match self.scopes.get_binding(expression.name.symbol).copied() {
            Some(Binding::Declaration(declaration)) => {
                if !matches!(
                    module.declaration(declaration).kind,
                    DeclarationKind::Struct(_) | DeclarationKind::Alias(_)
                ) {
                    resolve_error!(self, expression.name.span, "'{name}' is not a type");
                    return None;
                }

                if !expression.template.is_empty() {
                    resolve_error!(self, expression.span, "type '{name}' does not take template arguments");
                    return None;
                }

                if !self.resolve_declaration(declaration, expression.name.span) {
                    return None;
                }

                self.info.type_declarations.get(&declaration).copied()
            }
            Some(_) => {
                resolve_error!(self, expression.name.span, "'{name}' is not a type");
                None
            }
            None => self.predeclared_type(id),
        }
    }

    /// Resolves the types built into the language
    fn predeclared_type(&mut self, id: TypeExpressionId) -> Option<TypeId> {
        let module = self.module;
        let expression = module.type_expression(id);
        let name = module.name(expression.name);
        let template = expression.template.as_slice();
        let span = expression.span;

        let expect_arguments = |resolver: &mut Self, count: std::ops::RangeInclusive<usize>| {
            if count.contains(&template.len()) {
                return true;
            }

            match (*count.start(), *count.end()) {
                (0, 0) => resolve_error!(resolver, span, "type '{name}' does not take template arguments"),
                (start, end) if start == end => {
                    resolve_error!(resolver, span, "type '{name}' expects {start} template argument(s)")
                }
                (start, end) => {
                    resolve_error!(resolver, span, "type '{name}' expects {start} to {end} template arguments")
                }
            }

            false
        };

        if let Some(scalar) = scalar_from_name(name) {
            if !expect_arguments(self, 0..=0) {
                return None;
            }

            self.check_scalar_enabled(scalar, expression.name.span)?;
            return Some(self.types.scalar(scalar));
        }

        // Predeclared aliases: vec3f, vec4i, mat4x4f...
        if let Some((kind, scalar)) = shorthand(name) {
            if !expect_arguments(self, 0..=0) {
                return None;
            }

            self.check_scalar_enabled(scalar, expression.name.span)?;
            let kind = match kind {
                Shape::Vector(size) => TypeKind::Vector { size, scalar },
                Shape::Matrix(columns, rows) => TypeKind::Matrix { columns, rows, scalar },
            };

            return Some(self.types.intern(kind));
        }

        if let Some(shape) = shape_from_name(name) {
            if !expect_arguments(self, 1..=1) {
                return None;
            }

            let element = self.template_type(template[0])?;
            let scalar = self.types.as_scalar(element);

            return match (shape, scalar) {
                (Shape::Vector(size), Some(scalar)) if !scalar.is_abstract() => {
                    Some(self.types.vector(size, scalar))
                }
                (Shape::Matrix(columns, rows), Some(scalar @ (ScalarKind::F32 | ScalarKind::F16))) => {
                    Some(self.types.intern(TypeKind::Matrix { columns, rows, scalar }))
                }
                _ => {
                    resolve_error!(
                        self,
                        span,
                        "invalid element type '{}' for '{name}'",
                        self.types.name(element)
                    );
                    None
                }
            };
        }

        match name {
            "array" => {
                if !expect_arguments(self, 1..=2) {
                    return None;
                }

                let element = self.template_type(template[0])?;

                if self.types.has_runtime_size(element) || self.types.is_handle(element) {
                    resolve_error!(
                        self,
                        span,
                        "'{}' cannot be used as an array element type",
                        self.types.name(element)
                    );
                    return None;
                }

                let size = match template.get(1) {
                    Some(argument) => self.array_size(*argument)?,
                    None => ArraySize::Runtime,
                };

                Some(self.types.intern(TypeKind::Array { element, size }))
            }
            "ptr" => {
                if !expect_arguments(self, 2..=3) {
                    return None;
                }

                let space = self.template_enumerant::<AddressSpace>(template[0], "address space")?;
                let pointee = self.template_type(template[1])?;

                let access = match template.get(2) {
                    Some(argument) => {
                        let access = self.template_enumerant::<AccessMode>(*argument, "access mode")?;
                        if space != AddressSpace::Storage {
                            resolve_error!(
                                self,
                                span,
                                "only pointers in the 'storage' address space may specify an access mode"
                            );
                            return None;
                        }

                        access
                    }
                    None => space.default_access(),
                };

                if space == AddressSpace::Handle {
                    resolve_error!(self, span, "invalid address space 'handle'");
                    return None;
                }

                Some(self.types.pointer(space, access, pointee))
            }
            "atomic" => {
                if !expect_arguments(self, 1..=1) {
                    return None;
                }

                let element = self.template_type(template[0])?;
                match self.types.as_scalar(element) {
                    Some(scalar @ (ScalarKind::I32 | ScalarKind::U32)) => {
                        Some(self.types.intern(TypeKind::Atomic(scalar)))
                    }
                    _ => {
                        resolve_error!(
                            self,
                            span,
                            "atomic element type must be 'i32' or 'u32', found '{}'",
                            self.types.name(element)
                        );
                        None
                    }
                }
            }
            "sampler" | "sampler_comparison" => {
                if !expect_arguments(self, 0..=0) {
                    return None;
                }

                let kind = if name == "sampler" {
                    SamplerKind::Filtering
                } else {
                    SamplerKind::Comparison
                };

                Some(self.types.intern(TypeKind::Sampler(kind)))
            }
            "texture_depth_multisampled_2d" => {
                if !expect_arguments(self, 0..=0) {
                    return None;
                }

                Some(self.types.intern(TypeKind::Texture {
                    dimension: TextureDimension::D2,
                    kind: TextureKind::Depth { multisampled: true },
                }))
            }
            "texture_multisampled_2d" => {
                if !expect_arguments(self, 1..=1) {
                    return None;
                }

                let sampled = self.texture_sampled_type(template[0])?;

                Some(self.types.intern(TypeKind::Texture {
                    dimension: TextureDimension::D2,
                    kind: TextureKind::Sampled {
                        sampled,
                        multisampled: true,
                    },
                }))
            }
            _ => self.texture_type(id),
        }
    }

    fn texture_type(&mut self, id: TypeExpressionId) -> Option<TypeId> {
        let module = self.module;
        let expression = module.type_expression(id);
        let name = module.name(expression.name);
        let template = expression.template.as_slice();
        let span = expression.span;

        let unresolved = |resolver: &mut Self| {
            resolve_error!(resolver, expression.name.span, "unresolved type '{name}'");
            None
        };

        let Some(suffix) = name.strip_prefix("texture_") else {
            return unresolved(self);
        };

        if let Some(dimension) = suffix.strip_prefix("depth_").and_then(TextureDimension::from_suffix) {
            if !template.is_empty() || dimension == TextureDimension::D1 || dimension == TextureDimension::D3 {
                return unresolved(self);
            }

            return Some(self.types.intern(TypeKind::Texture {
                dimension,
                kind: TextureKind::Depth { multisampled: false },
            }));
        }

        if let Some(dimension) = suffix.strip_prefix("storage_").and_then(TextureDimension::from_suffix) {
            if matches!(dimension, TextureDimension::Cube | TextureDimension::CubeArray) {
                return unresolved(self);
            }

            if template.len() != 2 {
                resolve_error!(self, span, "type '{name}' expects 2 template arguments");
                return None;
            }

            let format = self.template_enumerant::<TexelFormat>(template[0], "texel format")?;
            let access = self.template_enumerant::<AccessMode>(template[1], "access mode")?;

            return Some(self.types.intern(TypeKind::Texture {
                dimension,
                kind: TextureKind::Storage { format, access },
            }));
        }

        let Some(dimension) = TextureDimension::from_suffix(suffix) else {
            return unresolved(self);
        };

        if template.len() != 1 {
            resolve_error!(self, span, "type '{name}' expects 1 template argument");
            return None;
        }

        let sampled = self.texture_sampled_type(template[0])?;

        Some(self.types.intern(TypeKind::Texture {
            dimension,
            kind: TextureKind::Sampled {
                sampled,
                multisampled: false,
            },
        }))
    }

    fn texture_sampled_type(&mut self, argument: TemplateArgument) -> Option<ScalarKind> {
        let ty = self.template_type(argument)?;

        match self.types.as_scalar(ty) {
            Some(scalar @ (ScalarKind::F32 | ScalarKind::I32 | ScalarKind::U32)) => Some(scalar),
            _ => {
                resolve_error!(
                    self,
                    self.template_span(argument),
                    "texture sampled type must be 'f32', 'i32' or 'u32', found '{}'",
                    self.types.name(ty)
                );
                None
            }
        }
    }

    pub(super) fn template_type(&mut self, argument: TemplateArgument) -> Option<TypeId> {
        match argument {
            TemplateArgument::Type(ty) => self.resolve_type(ty),
            TemplateArgument::Expression(expression) => {
                resolve_error!(self, self.module.expression(expression).span, "expected a type");
                None
            }
        }
    }

    fn template_span(&self, argument: TemplateArgument) -> Span {
        match argument {
            TemplateArgument::Type(ty) => self.module.type_expression(ty).span,
            TemplateArgument::Expression(expression) => self.module.expression(expression).span,
        }
    }

    /// A bare name in a template list naming an enumerant, e.g. `storage`
    fn template_enumerant<T: std::str::FromStr>(&mut self, argument: TemplateArgument, what: &str) -> Option<T> {
        let module = self.module;

        let name = match argument {
            TemplateArgument::Type(ty) if module.type_expression(ty).template.is_empty() => {
                Some(module.name(module.type_expression(ty).name))
            }
            _ => None,
        };

        match name.map(|name| (name, name.parse::<T>())) {
            Some((name, Ok(value))) if name != "handle" => Some(value),
            Some((name, _)) => {
                resolve_error!(self, self.template_span(argument), "invalid {what} '{name}'");
                None
            }
            None => {
                resolve_error!(self, self.template_span(argument), "expected {what}");
                None
            }
        }
    }

    fn array_size(&mut self, argument: TemplateArgument) -> Option<ArraySize> {
        let span = self.template_span(argument);

        let (stage, value) = match argument {
            TemplateArgument::Expression(expression) => {
                let info = self.resolve_value(expression)?;
                (info.stage, info.value)
            }
            // Identifiers in template lists parse as types; here they name a
            // const or an override
            TemplateArgument::Type(ty) => {
                let module = self.module;
                let expression = module.type_expression(ty);

                match self.scopes.get_binding(expression.name.symbol).copied() {
                    Some(Binding::Declaration(declaration)) if expression.template.is_empty() => {
                        if !self.resolve_declaration(declaration, span) {
                            return None;
                        }

                        match self.info.globals.get(&declaration) {
                            Some(global) if global.kind == GlobalKind::Const => {
                                (EvaluationStage::Constant, global.value.clone())
                            }
                            Some(global) if global.kind == GlobalKind::Override => {
                                if !self.types.as_scalar(global.ty).is_some_and(ScalarKind::is_integer) {
                                    resolve_error!(self, span, "array count must be an integer");
                                    return None;
                                }

                                self.referenced.insert(declaration);
                                return Some(ArraySize::Override(declaration));
                            }
                            _ => {
                                resolve_error!(self, span, "array count must be a const-expression or override");
                                return None;
                            }
                        }
                    }
                    Some(Binding::Local(statement)) => match self.info.locals.get(&statement) {
                        Some(local) if local.kind == LocalKind::Const => {
                            (EvaluationStage::Constant, local.value.clone())
                        }
                        _ => {
                            resolve_error!(self, span, "array count must be a const-expression or override");
                            return None;
                        }
                    },
                    _ => {
                        resolve_error!(self, span, "array count must be a const-expression or override");
                        return None;
                    }
                }
            }
        };

        if stage != EvaluationStage::Constant {
            resolve_error!(self, span, "array count must be a const-expression or override");
            return None;
        }

        let count = value.as_ref().and_then(|value| value.as_i64());

        match count.map(u32::try_from) {
            Some(Ok(count)) if count > 0 => Some(ArraySize::Constant(count)),
            Some(_) => {
                resolve_error!(self, span, "array count must be greater than 0");
                None
            }
            None => {
                resolve_error!(self, span, "array count must be an integer");
                None
            }
        }
    }

    /// `f16` requires `enable f16;`
    pub(super) fn check_scalar_enabled(&mut self, scalar: ScalarKind, usage: Span) -> Option<()> {
        if scalar == ScalarKind::F16 && !self.f16_enabled {
            resolve_error!(self, usage, "'f16' requires the f16 extension: add 'enable f16;'");
            return None;
        }

        Some(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Shape {
    Vector(u8),
    Matrix(u8, u8),
}

pub(super) fn scalar_from_name(name: &str) -> Option<ScalarKind> {
    Some(match name {
        "bool" => ScalarKind::Bool,
        "i32" => ScalarKind::I32,
        "u32" => ScalarKind::U32,
        "f32" => ScalarKind::F32,
        "f16" => ScalarKind::F16,
        _ => return None,
    })
}

/// `vec2`..`vec4` and `mat2x2`..`mat4x4`
pub(super) fn shape_from_name(name: &str) -> Option<Shape> {
    let dimension = |c: u8| (b'2'..=b'4').contains(&c).then_some(c - b'0');

    match name.as_bytes() {
        [b'v', b'e', b'c', n] => Some(Shape::Vector(dimension(*n)?)),
        [b'm', b'a', b't', c, b'x', r] => Some(Shape::Matrix(dimension(*c)?, dimension(*r)?)),
        _ => None,
    }
}

fn shorthand(name: &str) -> Option<(Shape, ScalarKind)> {
    let (prefix, suffix) = name.split_at_checked(name.len().checked_sub(1)?)?;

    let scalar = match suffix {
        "i" => ScalarKind::I32,
        "u" => ScalarKind::U32,
        "f" => ScalarKind::F32,
        "h" => ScalarKind::F16,
        _ => return None,
    };

    match shape_from_name(prefix)? {
        Shape::Matrix(..) if !scalar.is_float() => None,
        shape => Some((shape, scalar)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predeclared_shapes() {
        assert_eq!(shape_from_name("vec3"), Some(Shape::Vector(3)));
        assert_eq!(shape_from_name("mat4x2"), Some(Shape::Matrix(4, 2)));
        assert_eq!(shape_from_name("vec5"), None);
        assert_eq!(shorthand("vec4f"), Some((Shape::Vector(4), ScalarKind::F32)));
        assert_eq!(shorthand("mat3x3h"), Some((Shape::Matrix(3, 3), ScalarKind::F16)));
        assert_eq!(shorthand("mat2x2i"), None);
        assert_eq!(shorthand("f"), None);
    }
}
