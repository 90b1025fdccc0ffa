//! The per-module orchestrator driving detection and the deobfuscation
//! lifecycle.
//!
//! One [`Deobfuscator`] is bound to one loaded module. It runs every aspect
//! detector once at [`Deobfuscator::scan`], aggregates their findings into a
//! confidence score, and then drives the staged lifecycle: `begin`, the
//! per-method stage, `end`, and on request the raw-image method decryption.
//! When the host rewrites and reloads the module,
//! [`Deobfuscator::on_module_reloaded`] builds a fresh orchestrator whose
//! detectors are rebound by identity - never by carrying references forward.

use crate::{
    deobfuscation::{
        cleanup::CleanupPlan,
        config::Options,
        detection::DetectionScore,
        detector::Detector,
        host::HostServices,
        maintype::MainType,
        methods::{DumpedMethods, MethodsDecrypter},
        proxies::ProxyCallFixer,
        resolver::AssemblyResolver,
        strings::StringDecrypter,
        version::ObfuscatorVersion,
    },
    events::EventLog,
    metadata::{method::MethodBody, module::Module},
    Result,
};

/// Human-readable name of the obfuscator family this core handles.
pub const OBFUSCATOR_NAME: &str = "CodeVeil";

/// Short type id of the obfuscator family.
pub const OBFUSCATOR_TYPE: &str = "cv";

/// Exact name of the anti-tamper marker type.
const KILL_TYPE_NAME: &str = "____KILL";

/// A module image with its methods decrypted in place.
#[derive(Debug, Clone)]
pub struct DecryptedModule {
    /// The rewritten raw image.
    pub image: Vec<u8>,
    /// Mapping from raw method token to its recovered body.
    pub methods: DumpedMethods,
}

/// Orchestrates detection and deobfuscation of one loaded module.
pub struct Deobfuscator<'m> {
    module: &'m Module,
    options: Options,
    name: String,
    found_kill_type: bool,
    main_type: MainType<'m>,
    methods_decrypter: MethodsDecrypter<'m>,
    string_decrypter: StringDecrypter<'m>,
    proxy_fixer: ProxyCallFixer<'m>,
    assembly_resolver: AssemblyResolver<'m>,
    cleanup: CleanupPlan,
    events: EventLog,
}

impl<'m> Deobfuscator<'m> {
    /// Scans the module for the obfuscator's injected infrastructure.
    ///
    /// Runs once per module load: the anti-tamper marker check, the
    /// marker-type detector, the proxy delegate-creator search, and the
    /// method- and string-decrypter locators, in that order.
    #[must_use]
    pub fn scan(module: &'m Module, options: Options) -> Self {
        let events = EventLog::new();
        let mut cleanup = CleanupPlan::new();
        let found_kill_type = Self::find_kill_type(module, &mut cleanup, &events);

        let mut main_type = MainType::new(module);
        main_type.find();
        if main_type.is_detected() {
            events.info(format!(
                "found marker type {} (version {})",
                main_type
                    .type_ref()
                    .map(|t| t.full_name())
                    .unwrap_or_default(),
                main_type.version().suffix().unwrap_or("unknown"),
            ));
        }

        let mut proxy_fixer = ProxyCallFixer::new(module, &main_type);
        proxy_fixer.find_delegate_creator();

        let mut methods_decrypter = MethodsDecrypter::new(module, &main_type);
        methods_decrypter.find();

        let mut string_decrypter = StringDecrypter::new(module, &main_type);
        string_decrypter.find();

        let name = Self::derive_name(&main_type);

        Self {
            module,
            options,
            name,
            found_kill_type,
            main_type,
            methods_decrypter,
            string_decrypter,
            proxy_fixer,
            assembly_resolver: AssemblyResolver::new(module),
            cleanup,
            events,
        }
    }

    fn find_kill_type(module: &Module, cleanup: &mut CleanupPlan, events: &EventLog) -> bool {
        for ty in &module.types {
            if ty.full_name() == KILL_TYPE_NAME {
                cleanup.schedule_type(ty.token, KILL_TYPE_NAME, "KILL type");
                events.info("found anti-tamper KILL type");
                return true;
            }
        }
        false
    }

    fn derive_name(main_type: &MainType<'_>) -> String {
        if main_type.is_detected() {
            if let Some(suffix) = main_type.version().suffix() {
                return format!("{OBFUSCATOR_NAME} {suffix}");
            }
        }
        OBFUSCATOR_NAME.to_string()
    }

    /// Returns the obfuscator name, version suffix included when one was
    /// classified.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the short type id of this obfuscator family.
    #[must_use]
    pub fn obfuscator_type(&self) -> &'static str {
        OBFUSCATOR_TYPE
    }

    /// Returns the module this orchestrator is bound to.
    #[must_use]
    pub fn module(&self) -> &'m Module {
        self.module
    }

    /// Returns the classified obfuscator version.
    #[must_use]
    pub fn version(&self) -> ObfuscatorVersion {
        self.main_type.version()
    }

    /// Returns true if the anti-tamper marker type was found.
    #[must_use]
    pub fn found_kill_type(&self) -> bool {
        self.found_kill_type
    }

    /// Computes the confidence score from the current detector state.
    ///
    /// Pure and side-effect free; calling it repeatedly yields the same
    /// value.
    #[must_use]
    pub fn detect(&self) -> DetectionScore {
        DetectionScore::from_aspects(
            &[
                (
                    Detector::name(&self.main_type),
                    self.main_type.is_detected(),
                ),
                (
                    Detector::name(&self.methods_decrypter),
                    self.methods_decrypter.is_detected(),
                ),
                (
                    Detector::name(&self.string_decrypter),
                    self.string_decrypter.is_detected(),
                ),
                (
                    Detector::name(&self.proxy_fixer),
                    self.proxy_fixer.is_detected(),
                ),
            ],
            self.found_kill_type,
            self.main_type.version(),
        )
    }

    /// Returns the confidence value of [`Deobfuscator::detect`].
    #[must_use]
    pub fn confidence(&self) -> u32 {
        self.detect().score()
    }

    /// Begins deobfuscation.
    ///
    /// When string decryption is enabled, prepares the string decrypter and
    /// notifies the host that its hook is live. Extracts every bundled
    /// assembly exactly once, schedules the bundle's resources for removal,
    /// and runs the proxy finder's second pass.
    ///
    /// # Errors
    ///
    /// Returns an error when the host fails to persist an extracted
    /// assembly.
    pub fn begin(&mut self, host: &mut dyn HostServices) -> Result<()> {
        if self.options.string_decrypt_mode.is_enabled() {
            self.string_decrypter.initialize();
            if let Some(method) = self.string_decrypter.method_id() {
                host.add_string_decrypter(&method);
                self.events.info("string decrypter hook registered");
            }
            host.string_decrypters_added();
        }

        self.assembly_resolver.initialize();
        for info in self.assembly_resolver.assemblies() {
            host.create_assembly_file(&info.data, &info.simple_name, &info.extension)?;
        }
        let extracted = self.assembly_resolver.assemblies().len();
        if extracted > 0 {
            self.events
                .info(format!("extracted {extracted} embedded assemblies"));
        }
        if let Some(blob) = self.assembly_resolver.bundle_data_resource() {
            self.cleanup
                .schedule_resource(&blob.name, "Embedded assemblies resource");
        }
        if let Some(manifest) = self.assembly_resolver.bundle_manifest_resource() {
            self.cleanup
                .schedule_resource(&manifest.name, "Embedded assemblies XML file resource");
        }

        self.proxy_fixer.resolve_proxies();
        let proxies = self.proxy_fixer.proxies().len();
        if proxies > 0 {
            self.events
                .info(format!("resolved {proxies} proxy delegates"));
        }

        Ok(())
    }

    /// Per-method stage: rewrites proxy invocations in `body` before any
    /// other per-method processing.
    pub fn method_begin(&mut self, body: &mut MethodBody) {
        self.proxy_fixer.deobfuscate(body);
    }

    /// Inlines decrypted string literals into `body`.
    ///
    /// No-op when string decryption is disabled by configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when executing the decrypt routine through the host
    /// fails.
    pub fn deobfuscate_strings(
        &self,
        host: &dyn HostServices,
        body: &mut MethodBody,
    ) -> Result<usize> {
        if !self.options.string_decrypt_mode.is_enabled() {
            return Ok(0);
        }
        self.string_decrypter.inline_strings(host, body)
    }

    /// Ends deobfuscation: schedules the proxy infrastructure for removal.
    ///
    /// Deliberately conservative - when any proxy invocation could not be
    /// rewritten, the proxy types stay, since queued methods may still
    /// reference them.
    pub fn end(&mut self) {
        if !self.proxy_fixer.is_detected() {
            return;
        }

        let removable = self.proxy_fixer.removable_types();
        if removable.is_empty() && !self.proxy_fixer.proxies().is_empty() {
            self.events.warn(format!(
                "leaving {} proxy delegate types in place - {} unresolved invocations",
                self.proxy_fixer.proxies().len(),
                self.proxy_fixer.errors()
            ));
            return;
        }
        for (token, full_name) in removable {
            self.cleanup
                .schedule_type(token, &full_name, "Proxy delegate type");
        }
    }

    /// Decrypts the module's encrypted method bodies.
    ///
    /// Valid only when the methods decrypter is detected: reads the module's
    /// own raw bytes, decrypts in place, and returns the rewritten image
    /// with the dumped-method map. Returns `Ok(None)` - mutating nothing -
    /// when the decrypter is not detected or the payload fails to decode.
    ///
    /// # Errors
    ///
    /// Returns an error when the module's raw image cannot be read.
    pub fn decrypted_module(&self) -> Result<Option<DecryptedModule>> {
        if !self.methods_decrypter.is_detected() {
            return Ok(None);
        }

        let mut image = self.module.raw_image()?;
        let mut methods = DumpedMethods::new();
        if !self.methods_decrypter.decrypt(&mut image, &mut methods) {
            self.events
                .warn("method payload failed to decode - treating as false positive");
            return Ok(None);
        }

        self.events
            .info(format!("decrypted {} method bodies", methods.len()));
        Ok(Some(DecryptedModule { image, methods }))
    }

    /// Returns the string-decrypter method identifiers as fixed-width
    /// hexadecimal tokens.
    #[must_use]
    pub fn string_decrypter_methods(&self) -> Vec<String> {
        self.string_decrypter
            .method_token()
            .map(|t| format!("{:08X}", t.value()))
            .into_iter()
            .collect()
    }

    /// Builds a fresh orchestrator bound to a freshly reloaded module.
    ///
    /// Every detector is rebuilt by resolving its previously found members
    /// against `module`. A detector whose members no longer resolve reports
    /// not-detected; the others are unaffected. The old orchestrator must
    /// not be used afterwards.
    #[must_use]
    pub fn on_module_reloaded<'n>(&self, module: &'n Module) -> Deobfuscator<'n> {
        let events = EventLog::new();
        let mut cleanup = CleanupPlan::new();
        let found_kill_type = Deobfuscator::find_kill_type(module, &mut cleanup, &events);

        let main_type = MainType::rebind(module, &self.main_type);
        let methods_decrypter = MethodsDecrypter::rebind(module, &main_type, &self.methods_decrypter);
        let string_decrypter = StringDecrypter::rebind(module, &main_type, &self.string_decrypter);
        let proxy_fixer = ProxyCallFixer::rebind(module, &main_type, &self.proxy_fixer);
        let name = Deobfuscator::derive_name(&main_type);

        events.info("rebound detectors against reloaded module");

        Deobfuscator {
            module,
            options: self.options.clone(),
            name,
            found_kill_type,
            main_type,
            methods_decrypter,
            string_decrypter,
            proxy_fixer,
            assembly_resolver: AssemblyResolver::new(module),
            cleanup,
            events,
        }
    }

    /// Returns the fixed set of aspect detectors for diagnostics.
    #[must_use]
    pub fn detectors(&self) -> [&dyn Detector; 5] {
        [
            &self.main_type,
            &self.methods_decrypter,
            &self.string_decrypter,
            &self.proxy_fixer,
            &self.assembly_resolver,
        ]
    }

    /// Returns the marker-type detector.
    #[must_use]
    pub fn main_type(&self) -> &MainType<'m> {
        &self.main_type
    }

    /// Returns the string decrypter.
    #[must_use]
    pub fn string_decrypter(&self) -> &StringDecrypter<'m> {
        &self.string_decrypter
    }

    /// Returns the assembly resolver.
    #[must_use]
    pub fn assembly_resolver(&self) -> &AssemblyResolver<'m> {
        &self.assembly_resolver
    }

    /// Returns everything scheduled for removal so far.
    #[must_use]
    pub fn cleanup_plan(&self) -> &CleanupPlan {
        &self.cleanup
    }

    /// Returns the diagnostics recorded during this session.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }
}
