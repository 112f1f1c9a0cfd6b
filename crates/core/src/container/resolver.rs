//! Constructor and factory-method resolution.
//!
//! Candidates are sorted public-first, then by descending parameter count.
//! Each candidate that can take the available arguments gets a full argument
//! array (explicit values first, autowiring for the rest) and is scored; the
//! lowest weight wins. The choice and its arguments are cached on the
//! definition so later creations skip the search.

use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace};

use crate::container::autowiring::{DependencyDescriptor, DependencyResolver};
use crate::container::descriptor::{
    AutowireMode, BeanDefinition, ParameterDescriptor, PreparedArgument, ResolvedCandidate,
    ValueHolder, ValueSource,
};
use crate::container::factory::BeanFactory;
use crate::errors::CoreError;
use crate::types::{assignability_weight, type_difference_weight, Instance, TypeInfo};

const RAW_ARGUMENT_BIAS: i32 = 1024;

const CONSTRUCTOR_HINT: &str = "(hint: specify index/type/name arguments for simple parameters to avoid type ambiguities. You should also check the consistency of arguments when mixing indexed and named arguments, especially in case of bean definition inheritance)";

/// Constructor argument after references and literals were resolved
#[derive(Debug, Clone)]
struct ResolvedHolder {
    value: Instance,
    source: ValueSource,
    type_name: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Indexed(usize),
    Generic(usize),
}

#[derive(Debug, Default)]
struct ResolvedArgumentValues {
    indexed: BTreeMap<usize, ResolvedHolder>,
    generic: Vec<ResolvedHolder>,
}

impl ResolvedArgumentValues {
    fn argument_count(&self) -> usize {
        self.indexed.len() + self.generic.len()
    }

    fn argument_value(
        &self,
        index: usize,
        required_type: &TypeInfo,
        required_name: &str,
        used: &HashSet<Slot>,
    ) -> Option<(Slot, &ResolvedHolder)> {
        self.indexed_value(index, required_type, required_name)
            .map(|holder| (Slot::Indexed(index), holder))
            .or_else(|| self.generic_value(Some(required_type), Some(required_name), used))
    }

    fn indexed_value(&self, index: usize, required_type: &TypeInfo, required_name: &str) -> Option<&ResolvedHolder> {
        let holder = self.indexed.get(&index)?;
        let type_matches = holder
            .type_name
            .as_deref()
            .map_or(true, |name| matches_type_name(required_type, name));
        let name_matches = holder
            .name
            .as_deref()
            .map_or(true, |name| required_name.is_empty() || required_name == name);
        if type_matches && name_matches {
            Some(holder)
        } else {
            None
        }
    }

    fn generic_value(
        &self,
        required_type: Option<&TypeInfo>,
        required_name: Option<&str>,
        used: &HashSet<Slot>,
    ) -> Option<(Slot, &ResolvedHolder)> {
        for (position, holder) in self.generic.iter().enumerate() {
            let slot = Slot::Generic(position);
            if used.contains(&slot) {
                continue;
            }
            if let Some(name) = holder.name.as_deref() {
                match required_name {
                    Some(required) if required.is_empty() || required == name => {}
                    _ => continue,
                }
            }
            if let Some(type_name) = holder.type_name.as_deref() {
                match required_type {
                    Some(required) if matches_type_name(required, type_name) => {}
                    _ => continue,
                }
            }
            if let Some(required) = required_type {
                if holder.type_name.is_none()
                    && holder.name.is_none()
                    && !required.is_assignable_from(holder.value.type_info())
                {
                    continue;
                }
            }
            return Some((slot, holder));
        }
        None
    }

    fn describe_types(&self) -> Vec<String> {
        self.indexed
            .values()
            .chain(self.generic.iter())
            .map(|holder| {
                holder
                    .type_name
                    .clone()
                    .unwrap_or_else(|| holder.value.type_info().name().to_string())
            })
            .collect()
    }
}

fn matches_type_name(ty: &TypeInfo, type_name: &str) -> bool {
    ty.name() == type_name || ty.name().rsplit('.').next() == Some(type_name)
}

/// Argument arrays for one candidate
#[derive(Debug, Clone)]
struct ArgumentsHolder {
    raw_arguments: Vec<Instance>,
    arguments: Vec<Instance>,
    prepared_arguments: Vec<PreparedArgument>,
    resolve_necessary: bool,
}

impl ArgumentsHolder {
    fn with_capacity(size: usize) -> Self {
        Self {
            raw_arguments: Vec::with_capacity(size),
            arguments: Vec::with_capacity(size),
            prepared_arguments: Vec::with_capacity(size),
            resolve_necessary: false,
        }
    }

    fn explicit(args: &[Instance]) -> Self {
        Self {
            raw_arguments: args.to_vec(),
            arguments: args.to_vec(),
            prepared_arguments: args.iter().cloned().map(PreparedArgument::Resolved).collect(),
            resolve_necessary: false,
        }
    }

    /// Converted-argument weight, or raw-argument weight biased so a match without conversion wins
    fn type_difference_weight(&self, param_types: &[TypeInfo]) -> i32 {
        let type_diff_weight = type_difference_weight(param_types, &self.arguments);
        let raw_type_diff_weight = type_difference_weight(param_types, &self.raw_arguments) - RAW_ARGUMENT_BIAS;
        raw_type_diff_weight.min(type_diff_weight)
    }

    fn assignability_weight(&self, param_types: &[TypeInfo]) -> i32 {
        assignability_weight(param_types, &self.arguments, &self.raw_arguments)
    }

    fn store_cache(&self, definition: &BeanDefinition, candidate: ResolvedCandidate) {
        let mut cache = definition.resolution();
        cache.resolved_candidate = Some(candidate);
        cache.arguments_resolved = true;
        if self.resolve_necessary {
            cache.prepared_arguments = Some(self.prepared_arguments.clone());
        } else {
            cache.resolved_arguments = Some(self.arguments.clone());
        }
    }
}

/// Signature-level view shared by constructors and factory methods
struct Candidate {
    /// Index into the definition's constructor or factory-method list
    index: usize,
    parameters: Vec<ParameterDescriptor>,
    is_public: bool,
    description: String,
}

impl Candidate {
    fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    fn parameter_types(&self) -> Vec<TypeInfo> {
        self.parameters.iter().map(|p| p.type_info.clone()).collect()
    }
}

/// Public first, then more parameters first; stable, so declaration order breaks ties
fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.is_public
            .cmp(&a.is_public)
            .then_with(|| b.parameter_count().cmp(&a.parameter_count()))
    });
}

/// Picks and invokes the constructor or factory method for a bean definition
pub struct ConstructorResolver<'a> {
    factory: &'a BeanFactory,
}

impl<'a> ConstructorResolver<'a> {
    pub fn new(factory: &'a BeanFactory) -> Self {
        Self { factory }
    }

    fn is_lenient(&self, definition: &BeanDefinition) -> bool {
        definition
            .lenient_constructor_resolution()
            .unwrap_or(self.factory.config().lenient_constructor_resolution)
    }

    /// Create the bean through the best-matching constructor
    pub fn autowire_constructor(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
        explicit_args: Option<&[Instance]>,
    ) -> Result<Instance, CoreError> {
        let bean_type = definition.bean_type().name().to_string();
        let mut chosen: Option<usize> = None;
        let mut args_to_use: Option<Vec<Instance>> = None;

        if let Some(explicit) = explicit_args {
            args_to_use = Some(explicit.to_vec());
        } else {
            let (cached, to_resolve) = self.cached_resolution(definition, |c| match c {
                ResolvedCandidate::Constructor(index) => Some(index),
                ResolvedCandidate::FactoryMethod(_) => None,
            });
            if let Some((index, resolved)) = cached {
                chosen = Some(index);
                args_to_use = match (resolved, to_resolve) {
                    (Some(resolved), _) => Some(resolved),
                    (None, Some(prepared)) => {
                        let param_types = definition.constructors()[index].parameter_types();
                        Some(self.resolve_prepared_arguments(bean_name, &param_types, &prepared)?)
                    }
                    (None, None) => None,
                };
            }
        }

        if let (Some(index), Some(args)) = (chosen, args_to_use.as_ref()) {
            trace!("Using cached constructor for bean '{}'", bean_name);
            return self.instantiate(bean_name, definition, index, args);
        }

        let mut candidates: Vec<Candidate> = definition
            .constructors()
            .iter()
            .enumerate()
            .map(|(index, ctor)| Candidate {
                index,
                parameters: ctor.parameters().to_vec(),
                is_public: ctor.is_public(),
                description: ctor.describe(&bean_type),
            })
            .collect();

        if candidates.is_empty() {
            return Err(CoreError::bean_creation(
                bean_name,
                format!("No constructor declared on bean class [{}]", bean_type),
            ));
        }

        if candidates.len() == 1 && explicit_args.is_none() && !definition.has_constructor_args() {
            let unique = &candidates[0];
            if unique.parameter_count() == 0 {
                let mut cache = definition.resolution();
                cache.resolved_candidate = Some(ResolvedCandidate::Constructor(unique.index));
                cache.arguments_resolved = true;
                cache.resolved_arguments = Some(Vec::new());
                drop(cache);
                return self.instantiate(bean_name, definition, unique.index, &[]);
            }
        }

        // a lone constructor with parameters is autowired even without the mode
        let determined = candidates.len() == 1 && candidates[0].parameter_count() > 0;
        let autowiring = determined || definition.autowire_mode() == AutowireMode::Constructor;

        let mut resolved_values: Option<ResolvedArgumentValues> = None;
        let min_nr_of_args = match explicit_args {
            Some(explicit) => explicit.len(),
            None => {
                let mut values = ResolvedArgumentValues::default();
                let min = self.resolve_constructor_arguments(bean_name, definition, &mut values)?;
                resolved_values = Some(values);
                min
            }
        };

        sort_candidates(&mut candidates);
        let lenient = self.is_lenient(definition);
        let single_candidate = candidates.len() == 1;

        let mut best: Option<(usize, ArgumentsHolder)> = None;
        let mut min_type_diff_weight = i32::MAX;
        let mut ambiguous: Option<Vec<String>> = None;
        let mut causes: Vec<CoreError> = Vec::new();

        for (position, candidate) in candidates.iter().enumerate() {
            let parameter_count = candidate.parameter_count();
            if let Some((_, holder)) = &best {
                if holder.arguments.len() > parameter_count {
                    // greedy: everything after needs fewer arguments
                    break;
                }
            }
            if parameter_count < min_nr_of_args {
                continue;
            }

            let param_types = candidate.parameter_types();
            let holder = match (&resolved_values, explicit_args) {
                (Some(values), _) => match self.create_argument_array(
                    bean_name,
                    values,
                    &candidate.parameters,
                    autowiring,
                    single_candidate,
                ) {
                    Ok(holder) => holder,
                    Err(err) => {
                        trace!(
                            "Ignoring constructor [{}] of bean '{}': {}",
                            candidate.description,
                            bean_name,
                            err
                        );
                        causes.push(err);
                        continue;
                    }
                },
                (None, Some(explicit)) => {
                    if parameter_count != explicit.len() {
                        continue;
                    }
                    ArgumentsHolder::explicit(explicit)
                }
                (None, None) => continue,
            };

            let weight = if lenient {
                holder.type_difference_weight(&param_types)
            } else {
                holder.assignability_weight(&param_types)
            };

            if weight < min_type_diff_weight {
                min_type_diff_weight = weight;
                best = Some((position, holder));
                ambiguous = None;
            } else if weight == min_type_diff_weight {
                if let Some((best_position, _)) = &best {
                    let list = ambiguous.get_or_insert_with(|| vec![candidates[*best_position].description.clone()]);
                    list.push(candidate.description.clone());
                }
            }
        }

        let (position, holder) = match best {
            Some(best) => best,
            None => {
                if let Some(last) = causes.pop() {
                    for cause in causes {
                        self.factory.registry().on_suppressed_error(cause);
                    }
                    return Err(last);
                }
                return Err(CoreError::NoMatchingCandidate {
                    bean_name: bean_name.to_string(),
                    message: format!(
                        "Could not resolve matching constructor on bean class [{}] {}",
                        bean_type, CONSTRUCTOR_HINT
                    ),
                });
            }
        };

        if let Some(candidates) = ambiguous {
            if !lenient {
                return Err(CoreError::AmbiguousCandidates {
                    bean_name: bean_name.to_string(),
                    kind: "constructor".to_string(),
                    candidates,
                });
            }
            debug!(
                "Lenient resolution picked the first of several equally weighted constructors for bean '{}': {:?}",
                bean_name, candidates
            );
        }

        let index = candidates[position].index;
        if explicit_args.is_none() {
            holder.store_cache(definition, ResolvedCandidate::Constructor(index));
        }
        self.instantiate(bean_name, definition, index, &holder.arguments)
    }

    /// Create the bean through its factory method, static or on a factory bean
    pub fn instantiate_using_factory_method(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
        explicit_args: Option<&[Instance]>,
    ) -> Result<Instance, CoreError> {
        let method_name = definition.factory_method_name().unwrap_or_default().to_string();

        let (factory_bean, factory_class, is_static) = match definition.factory_bean_name() {
            Some(factory_bean_name) => {
                if factory_bean_name == bean_name {
                    return Err(CoreError::bean_definition_store(
                        bean_name,
                        "factory-bean reference points back to the same bean definition",
                    ));
                }
                let factory_bean = self.factory.get_bean(factory_bean_name)?;
                if definition.is_singleton() && self.factory.registry().contains_singleton(bean_name) {
                    return Err(CoreError::illegal_state(
                        "About-to-be-created singleton instance implicitly appeared through the creation of the factory bean that its bean definition points to",
                    ));
                }
                self.factory
                    .registry()
                    .register_dependent_bean(factory_bean_name, bean_name);
                let class_name = factory_bean.type_info().name().to_string();
                (Some(factory_bean), class_name, false)
            }
            None => (None, definition.bean_type().name().to_string(), true),
        };

        let mut chosen: Option<usize> = None;
        let mut args_to_use: Option<Vec<Instance>> = None;
        if let Some(explicit) = explicit_args {
            args_to_use = Some(explicit.to_vec());
        } else {
            let (cached, to_resolve) = self.cached_resolution(definition, |c| match c {
                ResolvedCandidate::FactoryMethod(index) => Some(index),
                ResolvedCandidate::Constructor(_) => None,
            });
            if let Some((index, resolved)) = cached {
                chosen = Some(index);
                args_to_use = match (resolved, to_resolve) {
                    (Some(resolved), _) => Some(resolved),
                    (None, Some(prepared)) => {
                        let param_types = definition.factory_methods()[index].parameter_types();
                        Some(self.resolve_prepared_arguments(bean_name, &param_types, &prepared)?)
                    }
                    (None, None) => None,
                };
            }
        }

        if let (Some(index), Some(args)) = (chosen, args_to_use.as_ref()) {
            trace!("Using cached factory method for bean '{}'", bean_name);
            return self.invoke_factory_method(bean_name, definition, factory_bean.as_ref(), index, args);
        }

        let mut candidates: Vec<Candidate> = definition
            .factory_methods()
            .iter()
            .enumerate()
            .filter(|(_, method)| method.is_static() == is_static && method.name() == method_name)
            .map(|(index, method)| Candidate {
                index,
                parameters: method.parameters().to_vec(),
                is_public: method.is_public(),
                description: method.describe(),
            })
            .collect();

        if candidates.len() == 1 && explicit_args.is_none() && !definition.has_constructor_args() {
            let unique = &candidates[0];
            if unique.parameter_count() == 0 {
                let index = unique.index;
                self.check_non_void(bean_name, definition, &factory_class, index)?;
                let mut cache = definition.resolution();
                cache.resolved_candidate = Some(ResolvedCandidate::FactoryMethod(index));
                cache.arguments_resolved = true;
                cache.resolved_arguments = Some(Vec::new());
                drop(cache);
                return self.invoke_factory_method(bean_name, definition, factory_bean.as_ref(), index, &[]);
            }
        }

        if candidates.len() > 1 {
            sort_candidates(&mut candidates);
        }

        let autowiring = definition.autowire_mode() == AutowireMode::Constructor;
        let lenient = self.is_lenient(definition);
        let single_candidate = candidates.len() == 1;

        let mut resolved_values: Option<ResolvedArgumentValues> = None;
        let min_nr_of_args = match explicit_args {
            Some(explicit) => explicit.len(),
            None if definition.has_constructor_args() => {
                let mut values = ResolvedArgumentValues::default();
                let min = self.resolve_constructor_arguments(bean_name, definition, &mut values)?;
                resolved_values = Some(values);
                min
            }
            None => 0,
        };
        // no explicit values at all still walks the autowiring path
        let empty_values = ResolvedArgumentValues::default();

        let mut best: Option<(usize, ArgumentsHolder)> = None;
        let mut min_type_diff_weight = i32::MAX;
        let mut ambiguous: Option<Vec<String>> = None;
        let mut causes: Vec<CoreError> = Vec::new();

        for (position, candidate) in candidates.iter().enumerate() {
            let parameter_count = candidate.parameter_count();
            if parameter_count < min_nr_of_args {
                continue;
            }
            let param_types = candidate.parameter_types();

            let holder = match explicit_args {
                Some(explicit) => {
                    if parameter_count != explicit.len() {
                        continue;
                    }
                    ArgumentsHolder::explicit(explicit)
                }
                None => {
                    let values = resolved_values.as_ref().unwrap_or(&empty_values);
                    match self.create_argument_array(
                        bean_name,
                        values,
                        &candidate.parameters,
                        autowiring,
                        single_candidate,
                    ) {
                        Ok(holder) => holder,
                        Err(err) => {
                            trace!(
                                "Ignoring factory method [{}] of bean '{}': {}",
                                candidate.description,
                                bean_name,
                                err
                            );
                            causes.push(err);
                            continue;
                        }
                    }
                }
            };

            let weight = if lenient {
                holder.type_difference_weight(&param_types)
            } else {
                holder.assignability_weight(&param_types)
            };

            if weight < min_type_diff_weight {
                min_type_diff_weight = weight;
                best = Some((position, holder));
                ambiguous = None;
            } else if weight == min_type_diff_weight && !lenient {
                // overloads with identical signatures are overrides, not ambiguity
                if let Some((best_position, _)) = &best {
                    let best_candidate = &candidates[*best_position];
                    if best_candidate.parameter_count() == parameter_count
                        && best_candidate.parameter_types() != param_types
                    {
                        let list = ambiguous.get_or_insert_with(|| vec![best_candidate.description.clone()]);
                        list.push(candidate.description.clone());
                    }
                }
            }
        }

        let (position, holder) = match best {
            Some(best) => best,
            None => {
                if let Some(last) = causes.pop() {
                    for cause in causes {
                        self.factory.registry().on_suppressed_error(cause);
                    }
                    return Err(last);
                }
                let arg_types: Vec<String> = match (explicit_args, &resolved_values) {
                    (Some(explicit), _) => explicit
                        .iter()
                        .map(|arg| arg.type_info().name().to_string())
                        .collect(),
                    (None, Some(values)) => values.describe_types(),
                    (None, None) => Vec::new(),
                };
                let factory_bean_part = definition
                    .factory_bean_name()
                    .map(|name| format!("factory bean '{}'; ", name))
                    .unwrap_or_default();
                return Err(CoreError::NoMatchingCandidate {
                    bean_name: bean_name.to_string(),
                    message: format!(
                        "No matching factory method found on class [{}]: {}factory method '{}({})'. Check that a method with the specified name {}exists and that it is {}.",
                        factory_class,
                        factory_bean_part,
                        method_name,
                        arg_types.join(", "),
                        if min_nr_of_args > 0 { "and arguments " } else { "" },
                        if is_static { "static" } else { "non-static" }
                    ),
                });
            }
        };

        let index = candidates[position].index;
        self.check_non_void(bean_name, definition, &factory_class, index)?;
        if let Some(candidates) = ambiguous {
            return Err(CoreError::AmbiguousCandidates {
                bean_name: bean_name.to_string(),
                kind: "factory method".to_string(),
                candidates,
            });
        }

        if explicit_args.is_none() {
            holder.store_cache(definition, ResolvedCandidate::FactoryMethod(index));
        }
        self.invoke_factory_method(bean_name, definition, factory_bean.as_ref(), index, &holder.arguments)
    }

    /// Cached candidate and either its resolved arguments or the prepared ones to re-resolve
    #[allow(clippy::type_complexity)]
    fn cached_resolution(
        &self,
        definition: &BeanDefinition,
        select: impl Fn(ResolvedCandidate) -> Option<usize>,
    ) -> (Option<(usize, Option<Vec<Instance>>)>, Option<Vec<PreparedArgument>>) {
        let cache = definition.resolution();
        match cache.resolved_candidate.and_then(select) {
            Some(index) if cache.arguments_resolved => {
                let resolved = cache.resolved_arguments.clone();
                let prepared = if resolved.is_none() {
                    cache.prepared_arguments.clone()
                } else {
                    None
                };
                (Some((index, resolved)), prepared)
            }
            _ => (None, None),
        }
    }

    fn check_non_void(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
        factory_class: &str,
        index: usize,
    ) -> Result<(), CoreError> {
        let method = &definition.factory_methods()[index];
        if method.is_void() {
            return Err(CoreError::InvalidFactoryMethod {
                bean_name: bean_name.to_string(),
                message: format!(
                    "Invalid factory method '{}' on class [{}]: needs to have a non-void return type!",
                    method.name(),
                    factory_class
                ),
            });
        }
        Ok(())
    }

    /// Resolve the definition's explicit argument values; returns the minimum argument count
    fn resolve_constructor_arguments(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
        resolved: &mut ResolvedArgumentValues,
    ) -> Result<usize, CoreError> {
        let args = definition.constructor_args();
        let mut min_nr_of_args = args.argument_count();

        for (index, holder) in args.indexed() {
            if index + 1 > min_nr_of_args {
                min_nr_of_args = index + 1;
            }
            let resolved_holder = self.resolve_holder(bean_name, holder)?;
            resolved.indexed.insert(*index, resolved_holder);
        }
        for holder in args.generic() {
            let resolved_holder = self.resolve_holder(bean_name, holder)?;
            resolved.generic.push(resolved_holder);
        }
        Ok(min_nr_of_args)
    }

    fn resolve_holder(&self, bean_name: &str, holder: &ValueHolder) -> Result<ResolvedHolder, CoreError> {
        let value = self
            .factory
            .resolve_value(bean_name, "constructor argument", &holder.value)?;
        Ok(ResolvedHolder {
            value,
            source: holder.value.clone(),
            type_name: holder.type_name.clone(),
            name: holder.name.clone(),
        })
    }

    /// Build the argument arrays for one candidate, or fail with an unsatisfied dependency
    fn create_argument_array(
        &self,
        bean_name: &str,
        resolved_values: &ResolvedArgumentValues,
        parameters: &[ParameterDescriptor],
        autowiring: bool,
        fallback: bool,
    ) -> Result<ArgumentsHolder, CoreError> {
        let mut args = ArgumentsHolder::with_capacity(parameters.len());
        let mut used: HashSet<Slot> = HashSet::new();
        let mut autowired_bean_names: Vec<String> = Vec::new();

        for (param_index, parameter) in parameters.iter().enumerate() {
            let param_type = &parameter.type_info;
            let param_name = parameter.name.as_deref().unwrap_or("");
            let injection_point = format!("parameter {} of type [{}]", param_index, param_type.name());

            let mut value_holder = resolved_values.argument_value(param_index, param_type, param_name, &used);
            if value_holder.is_none() && (!autowiring || parameters.len() == resolved_values.argument_count()) {
                value_holder = resolved_values.generic_value(None, None, &used);
            }

            match value_holder {
                Some((slot, holder)) => {
                    used.insert(slot);
                    let converted = self
                        .factory
                        .type_converter()
                        .convert_if_necessary(&holder.value, param_type)
                        .map_err(|err| {
                            CoreError::unsatisfied_dependency(
                                bean_name,
                                injection_point.clone(),
                                format!(
                                    "Could not convert argument value of type [{}] to required type [{}]: {}",
                                    holder.value.type_info().name(),
                                    param_type.name(),
                                    err
                                ),
                                Some(err),
                            )
                        })?;
                    let prepared = match &holder.source {
                        ValueSource::Instance(fixed) if fixed.ptr_eq(&converted) => {
                            PreparedArgument::Resolved(converted.clone())
                        }
                        source => {
                            args.resolve_necessary = true;
                            PreparedArgument::Source(source.clone())
                        }
                    };
                    args.arguments.push(converted);
                    args.raw_arguments.push(holder.value.clone());
                    args.prepared_arguments.push(prepared);
                }
                None => {
                    if !autowiring {
                        return Err(CoreError::unsatisfied_dependency(
                            bean_name,
                            injection_point,
                            format!(
                                "Ambiguous argument values for parameter of type [{}] - did you specify the correct bean references as arguments?",
                                param_type.name()
                            ),
                            None,
                        ));
                    }
                    let mut descriptor = DependencyDescriptor::of(param_type.clone());
                    if let Some(name) = &parameter.name {
                        descriptor = descriptor.named(name.clone());
                    }
                    let autowired = self
                        .resolve_autowired_argument(&descriptor, bean_name, &mut autowired_bean_names, fallback)
                        .map_err(|err| {
                            CoreError::unsatisfied_dependency(
                                bean_name,
                                injection_point.clone(),
                                err.to_string(),
                                Some(err),
                            )
                        })?;
                    args.raw_arguments.push(autowired.clone());
                    args.arguments.push(autowired);
                    args.prepared_arguments.push(PreparedArgument::Autowired(descriptor));
                    args.resolve_necessary = true;
                }
            }
        }

        for autowired_bean_name in &autowired_bean_names {
            self.factory
                .registry()
                .register_dependent_bean(autowired_bean_name, bean_name);
            trace!(
                "Autowiring by type from bean name '{}' via constructor to bean named '{}'",
                bean_name,
                autowired_bean_name
            );
        }
        Ok(args)
    }

    fn resolve_autowired_argument(
        &self,
        descriptor: &DependencyDescriptor,
        bean_name: &str,
        autowired_bean_names: &mut Vec<String>,
        fallback: bool,
    ) -> Result<Instance, CoreError> {
        match self
            .factory
            .resolve_dependency(descriptor, Some(bean_name), autowired_bean_names)
        {
            Ok(Some(instance)) => Ok(instance),
            Ok(None) => Err(CoreError::no_such_bean_of_type(
                descriptor.required_type.name(),
                "expected at least 1 bean which qualifies as autowire candidate",
            )),
            Err(err @ CoreError::NoUniqueBean { .. }) => Err(err),
            Err(err @ CoreError::NoSuchBean { .. }) => {
                if fallback {
                    if let Some(empty) = descriptor.empty_value() {
                        return Ok(empty);
                    }
                }
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    fn resolve_prepared_arguments(
        &self,
        bean_name: &str,
        param_types: &[TypeInfo],
        prepared: &[PreparedArgument],
    ) -> Result<Vec<Instance>, CoreError> {
        let mut resolved = Vec::with_capacity(prepared.len());
        for (index, (argument, param_type)) in prepared.iter().zip(param_types).enumerate() {
            let value = match argument {
                PreparedArgument::Resolved(value) => value.clone(),
                PreparedArgument::Source(source) => {
                    self.factory
                        .resolve_value(bean_name, "constructor argument", source)?
                }
                PreparedArgument::Autowired(descriptor) => {
                    let mut names = Vec::new();
                    self.resolve_autowired_argument(descriptor, bean_name, &mut names, true)?
                }
            };
            let converted = self
                .factory
                .type_converter()
                .convert_if_necessary(&value, param_type)
                .map_err(|err| {
                    CoreError::unsatisfied_dependency(
                        bean_name,
                        format!("parameter {} of type [{}]", index, param_type.name()),
                        format!(
                            "Could not convert argument value of type [{}] to required type [{}]: {}",
                            value.type_info().name(),
                            param_type.name(),
                            err
                        ),
                        Some(err),
                    )
                })?;
            resolved.push(converted);
        }
        Ok(resolved)
    }

    fn instantiate(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
        index: usize,
        args: &[Instance],
    ) -> Result<Instance, CoreError> {
        let ctor = &definition.constructors()[index];
        ctor.instantiate(args).map_err(|err| {
            CoreError::bean_creation_with_cause(
                bean_name,
                format!(
                    "Bean instantiation via constructor failed: Failed to instantiate [{}]",
                    ctor.describe(definition.bean_type().name())
                ),
                err,
            )
        })
    }

    fn invoke_factory_method(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
        factory_bean: Option<&Instance>,
        index: usize,
        args: &[Instance],
    ) -> Result<Instance, CoreError> {
        let method = &definition.factory_methods()[index];
        let result = method.invoke(factory_bean, args).map_err(|err| {
            CoreError::bean_creation_with_cause(
                bean_name,
                format!(
                    "Bean instantiation via factory method failed: Factory method '{}' threw exception",
                    method.name()
                ),
                err,
            )
        })?;
        result.ok_or_else(|| {
            CoreError::bean_creation(
                bean_name,
                format!("Factory method '{}' returned no instance", method.name()),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(index: usize, params: usize, is_public: bool) -> Candidate {
        Candidate {
            index,
            parameters: (0..params)
                .map(|_| ParameterDescriptor::typed(TypeInfo::object()))
                .collect(),
            is_public,
            description: format!("c{}", index),
        }
    }

    #[test]
    fn test_sort_public_first_then_more_parameters() {
        let mut candidates = vec![
            candidate(0, 0, true),
            candidate(1, 3, false),
            candidate(2, 2, true),
            candidate(3, 2, true),
        ];
        sort_candidates(&mut candidates);
        let order: Vec<usize> = candidates.iter().map(|c| c.index).collect();
        assert_eq!(order, vec![2, 3, 0, 1]);
    }

    #[test]
    fn test_raw_arguments_are_preferred() {
        let param_types = vec![TypeInfo::int()];
        let converted = ArgumentsHolder {
            raw_arguments: vec![Instance::string("5")],
            arguments: vec![Instance::int(5)],
            prepared_arguments: Vec::new(),
            resolve_necessary: false,
        };
        let raw = ArgumentsHolder::explicit(&[Instance::int(5)]);

        assert_eq!(converted.type_difference_weight(&param_types), 0);
        assert_eq!(raw.type_difference_weight(&param_types), -RAW_ARGUMENT_BIAS);
        assert_eq!(converted.assignability_weight(&param_types), i32::MAX - 512);
        assert_eq!(raw.assignability_weight(&param_types), i32::MAX - 1024);
    }

    #[test]
    fn test_generic_value_matching() {
        let data_source = TypeInfo::class("DataSource").build();
        let mut values = ResolvedArgumentValues::default();
        values.generic.push(ResolvedHolder {
            value: Instance::string("jdbc:mem"),
            source: ValueSource::Literal("jdbc:mem".into()),
            type_name: None,
            name: None,
        });
        values.generic.push(ResolvedHolder {
            value: Instance::new((), data_source.clone()),
            source: ValueSource::Reference("dataSource".into()),
            type_name: None,
            name: Some("ds".into()),
        });

        let mut used = HashSet::new();
        // typed lookup skips the untyped string that is not assignable
        let (slot, holder) = values
            .argument_value(0, &data_source, "ds", &used)
            .unwrap();
        assert_eq!(slot, Slot::Generic(1));
        assert_eq!(holder.name.as_deref(), Some("ds"));
        used.insert(slot);

        // untyped fallback hands out the remaining value
        let (slot, _) = values.generic_value(None, None, &used).unwrap();
        assert_eq!(slot, Slot::Generic(0));
        used.insert(slot);
        assert!(values.generic_value(None, None, &used).is_none());
    }

    #[test]
    fn test_indexed_value_respects_type_hint() {
        let mut values = ResolvedArgumentValues::default();
        values.indexed.insert(
            0,
            ResolvedHolder {
                value: Instance::string("5"),
                source: ValueSource::Literal("5".into()),
                type_name: Some("int".into()),
                name: None,
            },
        );
        let used = HashSet::new();
        assert!(values.argument_value(0, &TypeInfo::int(), "", &used).is_some());
        assert!(values.argument_value(0, &TypeInfo::string(), "", &used).is_none());
        assert_eq!(values.describe_types(), vec!["int".to_string()]);
    }
}
