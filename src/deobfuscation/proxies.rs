//! Detection and removal of call-indirection proxy delegates.
//!
//! Instead of calling a method directly, protected code loads a delegate
//! from a static field and invokes it. The delegates are materialized by a
//! factory on the marker type; each proxy delegate type's static constructor
//! loads the real target's method token as a constant and hands it to that
//! factory. Resolving the factory at detection time and the per-type
//! mappings in a second pass lets every proxy invocation be rewritten back
//! into a direct call.

use std::collections::HashMap;

use crate::{
    assembly::{Code, Instruction},
    deobfuscation::{detector::Detector, maintype::MainType, utils::is_any_call},
    metadata::{
        identity::MemberId,
        method::{MethodBody, MethodDef},
        module::Module,
        token::Token,
        types::TypeDef,
    },
};

/// Full name of the delegate base class proxies derive from.
const DELEGATE_BASE: &str = "System.MulticastDelegate";

/// One resolved proxy delegate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyInfo {
    /// Token of the proxy delegate type.
    pub delegate_type: Token,
    /// Namespace-qualified name of the proxy delegate type.
    pub delegate_name: String,
    /// Token of the static field holding the delegate instance.
    pub field: Token,
    /// Token of the call target the proxy stands in for.
    pub target: Token,
}

/// Finds proxy delegates and rewrites their invocations into direct calls.
pub struct ProxyCallFixer<'m> {
    module: &'m Module,
    marker_type: Option<&'m TypeDef>,
    creator: Option<&'m MethodDef>,
    proxies: HashMap<String, ProxyInfo>,
    errors: usize,
    rewritten: usize,
}

impl<'m> ProxyCallFixer<'m> {
    /// Creates a fixer bound to the marker-type detector's findings.
    #[must_use]
    pub fn new(module: &'m Module, main_type: &MainType<'m>) -> Self {
        Self {
            module,
            marker_type: main_type.type_ref(),
            creator: None,
            proxies: HashMap::new(),
            errors: 0,
            rewritten: 0,
        }
    }

    /// Rebinds against a freshly loaded module.
    ///
    /// Only the creator identity carries over; the proxy mappings are
    /// re-resolved by the second-pass [`ProxyCallFixer::resolve_proxies`],
    /// since the module may have changed since detection.
    #[must_use]
    pub fn rebind(module: &'m Module, main_type: &MainType<'m>, old: &ProxyCallFixer<'_>) -> Self {
        let mut rebound = Self::new(module, main_type);
        if let (Some(old_marker), Some(old_creator)) = (old.marker_type, old.creator) {
            rebound.creator = MemberId::of_method(old_marker, old_creator)
                .resolve_method(module)
                .map(|(_, m)| m);
        }
        rebound
    }

    /// Locates the factory method that materializes proxy delegates.
    ///
    /// Run during initial detection. The factory lives on the marker type,
    /// is static, and wires a method handle into
    /// `System.Delegate::CreateDelegate`.
    pub fn find_delegate_creator(&mut self) {
        let Some(marker) = self.marker_type else {
            return;
        };

        for method in &marker.methods {
            if !method.is_static() || !method.has_body() {
                continue;
            }

            let instrs = method.instructions();
            let has_ldtoken = instrs.iter().any(|i| i.code == Code::Ldtoken);
            let calls_create_delegate = instrs.iter().any(|i| {
                is_any_call(i)
                    && i.token()
                        .and_then(|t| self.module.member_ref(t))
                        .is_some_and(|r| {
                            r.declaring_type == "System.Delegate" && r.name == "CreateDelegate"
                        })
            });

            if has_ldtoken && calls_create_delegate {
                self.creator = Some(method);
                return;
            }
        }
    }

    /// Resolves the full set of proxy delegates.
    ///
    /// This is a second pass, run only after the lifecycle's begin stage -
    /// module state may have changed since detection. Idempotent; rerunning
    /// rebuilds the same mappings.
    pub fn resolve_proxies(&mut self) {
        let Some(creator) = self.creator else {
            return;
        };

        self.proxies.clear();
        for ty in self.module.all_types() {
            if ty.base_type.as_deref() != Some(DELEGATE_BASE) {
                continue;
            }
            let Some(cctor) = ty.cctor() else {
                continue;
            };
            let Some(target) = Self::creator_argument(cctor, creator.token) else {
                continue;
            };
            // The proxy instance lives in the delegate type's own static
            // field.
            let own_name = ty.full_name();
            let Some(field) = ty.fields.iter().find(|f| f.type_name == own_name) else {
                continue;
            };

            self.proxies.insert(
                own_name.clone(),
                ProxyInfo {
                    delegate_type: ty.token,
                    delegate_name: own_name,
                    field: field.token,
                    target,
                },
            );
        }
    }

    /// Extracts the target token loaded right before the creator call.
    fn creator_argument(cctor: &MethodDef, creator: Token) -> Option<Token> {
        let instrs = cctor.instructions();
        for index in 1..instrs.len() {
            let instr = &instrs[index];
            if !is_any_call(instr) || instr.token() != Some(creator) {
                continue;
            }
            if let Some(raw) = instrs[index - 1].ldc_i4_value() {
                return Some(Token::new(raw as u32));
            }
        }
        None
    }

    /// Returns the resolved proxies, keyed by delegate type full name.
    #[must_use]
    pub fn proxies(&self) -> &HashMap<String, ProxyInfo> {
        &self.proxies
    }

    /// Returns the number of proxy invocations that could not be resolved.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors
    }

    /// Returns the number of proxy invocations rewritten so far.
    #[must_use]
    pub fn rewritten(&self) -> usize {
        self.rewritten
    }

    /// Rewrites every recognized proxy invocation in `body` into a direct
    /// call to its original target.
    ///
    /// Idempotent: a body that was already cleaned contains no proxy
    /// invocations, so rerunning changes nothing.
    pub fn deobfuscate(&mut self, body: &mut MethodBody) {
        if self.proxies.is_empty() {
            return;
        }

        for index in 0..body.instructions.len() {
            let instr = &body.instructions[index];
            if !is_any_call(instr) {
                continue;
            }
            let Some(invoke_ref) = instr.token().and_then(|t| self.module.member_ref(t)) else {
                continue;
            };
            if invoke_ref.name != "Invoke" {
                continue;
            }

            let resolved = self
                .proxies
                .get(&invoke_ref.declaring_type)
                .map(|p| (p.field, p.target));
            match resolved {
                Some((field, target)) => {
                    body.instructions[index] = Instruction::call(target);
                    Self::erase_field_load(body, index, field);
                    self.rewritten += 1;
                }
                None => {
                    // An Invoke on a delegate we did not resolve; if it
                    // derives from the proxy infrastructure this keeps the
                    // type alive.
                    if self.is_proxy_like(&invoke_ref.declaring_type) {
                        self.errors += 1;
                    }
                }
            }
        }
    }

    /// Nops the closest preceding load of the proxy field.
    fn erase_field_load(body: &mut MethodBody, call_index: usize, field: Token) {
        for index in (0..call_index).rev() {
            let instr = &body.instructions[index];
            if instr.code == Code::Ldsfld && instr.token() == Some(field) {
                body.instructions[index] = Instruction::new(Code::Nop);
                return;
            }
        }
    }

    fn is_proxy_like(&self, type_name: &str) -> bool {
        self.module
            .type_by_full_name(type_name)
            .is_some_and(|t| t.base_type.as_deref() == Some(DELEGATE_BASE))
    }

    /// Returns the proxy delegate types that are safe to remove.
    ///
    /// Deliberately conservative: when any proxy invocation could not be
    /// rewritten, every proxy type is kept, since remaining call sites may
    /// still reference the infrastructure.
    #[must_use]
    pub fn removable_types(&self) -> Vec<(Token, String)> {
        if self.errors > 0 {
            return Vec::new();
        }
        self.proxies
            .values()
            .map(|p| (p.delegate_type, p.delegate_name.clone()))
            .collect()
    }
}

impl Detector for ProxyCallFixer<'_> {
    fn name(&self) -> &'static str {
        "proxy delegates"
    }

    fn is_detected(&self) -> bool {
        self.creator.is_some()
    }

    fn find(&mut self) {
        self.find_delegate_creator();
    }
}
