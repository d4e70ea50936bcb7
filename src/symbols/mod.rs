//! # Symbols Module
//!
//! Function and variable records recovered from debug information. A
//! [`SymbolProvider`] reports raw records; [`SymbolModel::from_raw`] applies
//! the drop rules once and produces the immutable model the rest of the
//! pipeline reads.

pub mod error;
pub mod pdb;
pub mod provider;
pub mod types;

use tracing::{debug, info};

pub use error::{Result, SymbolError};
pub use provider::{DataKind, RawDatum, RawFunction, StaticProvider, SymbolProvider};
pub use types::{
    FunctionSymbol, LocationKind, TypeRef, TypeShape, VariableRole, VariableSymbol,
};

pub const UNNAMED_COMPILAND: &str = "UnnamedCompiland";
pub const UNNAMED_FUNCTION: &str = "UnnamedFunction";
pub const UNNAMED_VARIABLE: &str = "NoName";

/// How many records the drop rules removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropStats {
    pub functions: usize,
    pub variables: usize,
}

/// Ordered, immutable list of functions with resolved address ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolModel {
    functions: Vec<FunctionSymbol>,
    dropped: DropStats,
}

impl SymbolModel {
    /// Build the model from provider output.
    ///
    /// Functions without an RVA or a length are dropped. Data records are
    /// kept only when they are parameters, locals or static locals with a
    /// known location.
    pub fn from_raw(raw: Vec<RawFunction>) -> Self {
        let mut functions = Vec::with_capacity(raw.len());
        let mut dropped = DropStats::default();

        for f in raw {
            let (Some(rva), Some(length)) = (f.rva, f.length) else {
                debug!(
                    function = f.name.as_deref().unwrap_or(UNNAMED_FUNCTION),
                    compiland = f.compiland.as_deref().unwrap_or(UNNAMED_COMPILAND),
                    "Dropping function without address range"
                );
                dropped.functions += 1;
                dropped.variables += f.data.len();
                continue;
            };

            let mut parameters = Vec::new();
            let mut locals = Vec::new();
            for datum in f.data {
                let role = match datum.kind {
                    DataKind::Param => VariableRole::Parameter,
                    DataKind::Local => VariableRole::Local,
                    DataKind::StaticLocal => VariableRole::StaticLocal,
                    _ => {
                        dropped.variables += 1;
                        continue;
                    }
                };
                if datum.location == LocationKind::Unknown {
                    debug!(
                        variable = datum.name.as_deref().unwrap_or(UNNAMED_VARIABLE),
                        "Dropping variable with unknown location"
                    );
                    dropped.variables += 1;
                    continue;
                }

                let var = VariableSymbol {
                    name: datum.name.unwrap_or_else(|| UNNAMED_VARIABLE.to_string()),
                    role,
                    location: datum.location,
                    register: datum.register,
                    offset: datum.offset,
                    section: datum.section,
                    size_bits: datum.size_bits,
                    type_ref: datum.type_ref,
                };
                match role {
                    VariableRole::Parameter => parameters.push(var),
                    _ => locals.push(var),
                }
            }

            functions.push(FunctionSymbol {
                compiland: f
                    .compiland
                    .unwrap_or_else(|| UNNAMED_COMPILAND.to_string()),
                name: f.name.unwrap_or_else(|| UNNAMED_FUNCTION.to_string()),
                rva,
                length,
                parameters,
                locals,
            });
        }

        info!(
            functions = functions.len(),
            dropped_functions = dropped.functions,
            dropped_variables = dropped.variables,
            "Symbol model built"
        );

        Self { functions, dropped }
    }

    /// Run a provider and build the model from its records
    pub fn load(provider: &mut dyn SymbolProvider) -> Result<Self> {
        Ok(Self::from_raw(provider.load()?))
    }

    pub fn functions(&self) -> &[FunctionSymbol] {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn dropped(&self) -> DropStats {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(name: &str, rva: Option<u32>, length: Option<u64>, data: Vec<RawDatum>) -> RawFunction {
        RawFunction {
            compiland: Some("main.obj".into()),
            name: Some(name.into()),
            rva,
            length,
            data,
        }
    }

    #[test]
    fn drops_functions_without_range() {
        let model = SymbolModel::from_raw(vec![
            func("a", Some(0x1000), Some(0x10), vec![]),
            func("b", None, Some(0x10), vec![]),
            func("c", Some(0x2000), None, vec![]),
            func("d", Some(0x3000), Some(0), vec![]),
        ]);
        let names: Vec<_> = model.functions().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "d"]);
        assert_eq!(model.dropped().functions, 2);
    }

    #[test]
    fn filters_and_classifies_data() {
        let data = vec![
            RawDatum::new(DataKind::Param, LocationKind::RegisterRelative)
                .named("argc")
                .register(334)
                .offset(0x10),
            RawDatum::new(DataKind::Local, LocationKind::RegisterValue)
                .named("x")
                .register(328),
            RawDatum::new(DataKind::StaticLocal, LocationKind::StaticImageAddress).named("count"),
            RawDatum::new(DataKind::Local, LocationKind::Unknown).named("optimized"),
            RawDatum::new(DataKind::Global, LocationKind::StaticImageAddress).named("g"),
            RawDatum::new(DataKind::Constant, LocationKind::ConstantValue).named("K"),
            RawDatum::new(DataKind::Local, LocationKind::RegisterRelative).offset(-8),
        ];
        let model = SymbolModel::from_raw(vec![func("main", Some(0x1000), Some(0x40), data)]);

        let f = &model.functions()[0];
        assert_eq!(f.parameters.len(), 1);
        assert_eq!(f.parameters[0].name, "argc");
        assert_eq!(f.parameters[0].role, VariableRole::Parameter);

        let locals: Vec<_> = f.locals.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(locals, vec!["x", "count", UNNAMED_VARIABLE]);
        assert_eq!(f.locals[1].role, VariableRole::StaticLocal);
        assert_eq!(model.dropped().variables, 3);
    }

    #[test]
    fn default_names() {
        let model = SymbolModel::from_raw(vec![RawFunction {
            rva: Some(0x1000),
            length: Some(1),
            ..Default::default()
        }]);
        let f = &model.functions()[0];
        assert_eq!(f.compiland, UNNAMED_COMPILAND);
        assert_eq!(f.name, UNNAMED_FUNCTION);
    }

    #[test]
    fn load_through_provider_preserves_order() {
        let mut provider = StaticProvider::new(vec![
            func("first", Some(0x2000), Some(4), vec![]),
            func("second", Some(0x1000), Some(4), vec![]),
        ]);
        let model = SymbolModel::load(&mut provider).unwrap();
        assert_eq!(model.len(), 2);
        assert_eq!(model.functions()[0].name, "first");
        assert!(!model.is_empty());
    }
}
