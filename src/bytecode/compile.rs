use std::borrow::Cow;
use std::collections::HashSet;

use crate::ast::{
    BinaryOp, ClassDef, CompilationUnit, Constant, Expr, ExprKind, FunctionDef, SlotTable, Span, Stmt, StmtKind,
    UnaryOp,
};
use crate::bytecode::code::{CodeBuffer, MethodCode};
use crate::bytecode::compile_error::GenerationError;
use crate::bytecode::ir::{ACC_STATIC, CompiledClass, CompiledField, CompiledMethod, CompiledModule};
use crate::bytecode::op::Opcode;
use crate::bytecode::pool::ConstantPool;
use crate::config::CompilerConfig;
use crate::passes::slots::{allocate_function, allocate_main};
use crate::resolve::{
    BuiltinFallback, ClassInfo, DescriptorCache, FIELD_DESCRIPTOR, MethodKind, MethodTarget, SymbolTable,
    method_descriptor, returns_value,
};

/// Static method holding the unit's top-level statements.
pub const MAIN_METHOD: &str = "<main>";

/// Instance method running a class's field initializers.
pub const INIT_METHOD: &str = "<init>";

/// What the generator needs to know about the method it is emitting.
#[derive(Debug)]
pub struct MethodContext<'a> {
    pub name: &'a str,
    pub owner: &'a str,
    /// Enclosing class of instance methods and initializers; slot 0 holds
    /// the receiver.
    pub class: Option<&'a ClassInfo>,
    pub slots: Cow<'a, SlotTable>,
    /// Descriptor ends in `A`; every exit must leave a value for VRETURN.
    pub returns_value: bool,
}

impl MethodContext<'_> {
    /// Locals (including parameters) shadow fields.
    fn is_field(&self, name: &str) -> bool {
        self.slots.slot_of(name).is_none() && self.class.is_some_and(|class| class.has_field(name))
    }
}

/// Emits stack-machine code for method bodies into a shared constant pool.
pub struct CodeGenerator<'a> {
    pool: &'a mut ConstantPool,
    symbols: &'a SymbolTable,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(pool: &'a mut ConstantPool, symbols: &'a SymbolTable) -> Self {
        Self { pool, symbols }
    }

    /// Generates a method body. `falls_through` appends the implicit return.
    pub fn generate<'s>(
        &mut self,
        body: impl IntoIterator<Item = &'s Stmt>,
        falls_through: bool,
        ctx: &MethodContext,
    ) -> Result<MethodCode, GenerationError> {
        let mut code = CodeBuffer::new();
        for stmt in body {
            self.compile_stmt(stmt, ctx, &mut code)?;
            debug_assert!(
                !code.is_reachable() || code.depth() == 0,
                "statement left {} values on the stack",
                code.depth()
            );
        }
        if falls_through {
            emit_bare_return(ctx, &mut code)?;
        }
        code.finish(ctx.slots.len())
    }

    /// Generates `<init>`: every field initializer in declaration order.
    pub fn generate_initializer(&mut self, class: &ClassDef, ctx: &MethodContext) -> Result<MethodCode, GenerationError> {
        let mut code = CodeBuffer::new();
        for field in class.fields() {
            if let Some(initializer) = &field.initializer {
                code.emit_u8(Opcode::Load, 0)?;
                self.compile_expr(initializer, ctx, &mut code)?;
                let field_ref = self.pool.field_ref(&class.name, &field.name, FIELD_DESCRIPTOR)?;
                code.emit_u16(Opcode::Putfield, field_ref)?;
            }
        }
        code.emit(Opcode::Return)?;
        code.finish(ctx.slots.len())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_stmt(&mut self, stmt: &Stmt, ctx: &MethodContext, code: &mut CodeBuffer) -> Result<(), GenerationError> {
        match &stmt.kind {
            StmtKind::Expression(expr) => self.compile_effect(expr, ctx, code),

            StmtKind::Return(None) => emit_bare_return(ctx, code),
            StmtKind::Return(Some(value)) => {
                self.compile_expr(value, ctx, code)?;
                code.emit(Opcode::Vreturn)
            }

            //   cond; IFEQ else; then; [GOTO join; else: else-branch]; join:
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let otherwise = code.new_label();
                self.compile_expr(condition, ctx, code)?;
                code.emit_jump(Opcode::Ifeq, otherwise)?;
                self.compile_stmt(then_branch, ctx, code)?;

                match else_branch {
                    Some(else_branch) => {
                        let join = code.new_label();
                        if code.is_reachable() {
                            code.emit_jump(Opcode::Goto, join)?;
                        }
                        code.mark(otherwise)?;
                        self.compile_stmt(else_branch, ctx, code)?;
                        code.mark(join)
                    }
                    None => code.mark(otherwise),
                }
            }

            //   start: cond; IFEQ end; body; GOTO start; end:
            StmtKind::While { condition, body } => {
                let start = code.new_label();
                let end = code.new_label();
                code.mark(start)?;
                self.compile_expr(condition, ctx, code)?;
                code.emit_jump(Opcode::Ifeq, end)?;
                self.compile_stmt(body, ctx, code)?;
                if code.is_reachable() {
                    code.emit_jump(Opcode::Goto, start)?;
                }
                code.mark(end)
            }

            //   init; start: [cond; IFEQ end]; body; update; GOTO start; end:
            StmtKind::For {
                init,
                condition,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.compile_effect(init, ctx, code)?;
                }
                let start = code.new_label();
                let end = code.new_label();
                code.mark(start)?;
                if let Some(condition) = condition {
                    self.compile_expr(condition, ctx, code)?;
                    code.emit_jump(Opcode::Ifeq, end)?;
                }
                self.compile_stmt(body, ctx, code)?;
                if let Some(update) = update {
                    self.compile_effect(update, ctx, code)?;
                }
                if code.is_reachable() {
                    code.emit_jump(Opcode::Goto, start)?;
                }
                code.mark(end)
            }

            StmtKind::Block(statements) => {
                for stmt in statements {
                    self.compile_stmt(stmt, ctx, code)?;
                }
                Ok(())
            }

            StmtKind::FunctionDef(function) => Err(GenerationError::unsupported(
                format!("nested function '{}'", function.name),
                stmt.span,
            )),
            StmtKind::ClassDef(class) => Err(GenerationError::unsupported(
                format!("nested class '{}'", class.name),
                stmt.span,
            )),
            StmtKind::Field(field) => Err(GenerationError::unsupported(
                format!("field '{}' outside a class body", field.name),
                stmt.span,
            )),
        }
    }

    /// Evaluates `expr` for its side effects, leaving the stack as it was.
    fn compile_effect(&mut self, expr: &Expr, ctx: &MethodContext, code: &mut CodeBuffer) -> Result<(), GenerationError> {
        match &expr.kind {
            ExprKind::Assign { target, value } => self.compile_assign(target, value, expr.span, false, ctx, code),
            ExprKind::Call { receiver, name, args } => {
                let pushed = self.compile_call(receiver.as_deref(), name, args, expr.span, false, ctx, code)?;
                if pushed {
                    code.emit(Opcode::Pop)?;
                }
                Ok(())
            }
            _ => {
                self.compile_expr(expr, ctx, code)?;
                code.emit(Opcode::Pop)
            }
        }
    }

    // =========================================================================
    // Expressions: each leaves exactly one value on the stack
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr, ctx: &MethodContext, code: &mut CodeBuffer) -> Result<(), GenerationError> {
        match &expr.kind {
            ExprKind::Constant(value) => self.compile_constant(value, expr.span, code),
            ExprKind::Variable(name) => self.compile_load(name, expr.span, ctx, code),
            ExprKind::Binary { op, left, right } => self.compile_binary(*op, left, right, ctx, code),

            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                self.compile_expr(operand, ctx, code)?;
                code.emit(Opcode::Ineg)
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                self.compile_expr(operand, ctx, code)?;
                self.emit_boolean(Opcode::Ifeq, code)
            }

            ExprKind::Call { receiver, name, args } => {
                self.compile_call(receiver.as_deref(), name, args, expr.span, true, ctx, code)?;
                Ok(())
            }
            ExprKind::Assign { target, value } => self.compile_assign(target, value, expr.span, true, ctx, code),
        }
    }

    fn compile_constant(&mut self, value: &Constant, span: Span, code: &mut CodeBuffer) -> Result<(), GenerationError> {
        match value {
            Constant::Int(n) => self.push_int(*n, code),
            Constant::Bool(b) => code.emit(if *b { Opcode::Iconst1 } else { Opcode::Iconst0 }),
            Constant::Str(text) => {
                let index = self.pool.string(text)?;
                emit_ldc(index, code)
            }
            Constant::Float(_) => Err(GenerationError::unsupported("floating-point constant", span)),
        }
    }

    /// Shortest encoding for an int: ICONST_n, BIPUSH, SIPUSH, then the pool.
    fn push_int(&mut self, n: i32, code: &mut CodeBuffer) -> Result<(), GenerationError> {
        if let Some(op) = Opcode::iconst(n) {
            return code.emit(op);
        }
        if let Ok(byte) = i8::try_from(n) {
            return code.emit_u8(Opcode::Bipush, byte as u8);
        }
        if let Ok(short) = i16::try_from(n) {
            return code.emit_u16(Opcode::Sipush, short as u16);
        }
        let index = self.pool.integer(n)?;
        emit_ldc(index, code)
    }

    fn compile_load(&mut self, name: &str, span: Span, ctx: &MethodContext, code: &mut CodeBuffer) -> Result<(), GenerationError> {
        if let Some(slot) = ctx.slots.slot_of(name) {
            return code.emit_u8(Opcode::Load, slot_operand(slot)?);
        }
        if ctx.is_field(name) {
            let field_ref = self.field_ref(ctx, name)?;
            code.emit_u8(Opcode::Load, 0)?;
            return code.emit_u16(Opcode::Getfield, field_ref);
        }
        Err(GenerationError::UndefinedVariable {
            name: name.to_string(),
            span,
        })
    }

    /// `keep_value` leaves a copy of the assigned value on the stack.
    fn compile_assign(
        &mut self,
        target: &str,
        value: &Expr,
        span: Span,
        keep_value: bool,
        ctx: &MethodContext,
        code: &mut CodeBuffer,
    ) -> Result<(), GenerationError> {
        if let Some(slot) = ctx.slots.slot_of(target) {
            let slot = slot_operand(slot)?;
            self.compile_expr(value, ctx, code)?;
            if keep_value {
                code.emit(Opcode::Dup)?;
            }
            return code.emit_u8(Opcode::Store, slot);
        }

        if ctx.is_field(target) {
            let field_ref = self.field_ref(ctx, target)?;
            code.emit_u8(Opcode::Load, 0)?;
            self.compile_expr(value, ctx, code)?;
            if keep_value {
                // this v -> v this v
                code.emit(Opcode::DupX1)?;
            }
            return code.emit_u16(Opcode::Putfield, field_ref);
        }

        Err(GenerationError::UndefinedVariable {
            name: target.to_string(),
            span,
        })
    }

    fn compile_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        ctx: &MethodContext,
        code: &mut CodeBuffer,
    ) -> Result<(), GenerationError> {
        let opcode = match op {
            BinaryOp::Add => Opcode::Iadd,
            BinaryOp::Sub => Opcode::Isub,
            BinaryOp::Mul => Opcode::Imul,
            BinaryOp::Div => Opcode::Idiv,
            BinaryOp::Rem => Opcode::Irem,

            BinaryOp::Eq => Opcode::IfIcmpeq,
            BinaryOp::NotEq => Opcode::IfIcmpne,
            BinaryOp::Lt => Opcode::IfIcmplt,
            BinaryOp::Gt => Opcode::IfIcmpgt,
            BinaryOp::LtEq => Opcode::IfIcmple,
            BinaryOp::GtEq => Opcode::IfIcmpge,

            BinaryOp::And => return self.compile_short_circuit(Opcode::Ifeq, left, right, ctx, code),
            BinaryOp::Or => return self.compile_short_circuit(Opcode::Ifne, left, right, ctx, code),
        };

        self.compile_expr(left, ctx, code)?;
        self.compile_expr(right, ctx, code)?;
        if op.is_comparison() {
            self.emit_boolean(opcode, code)
        } else {
            code.emit(opcode)
        }
    }

    /// `&&` (`exit` = IFEQ) and `||` (`exit` = IFNE):
    ///
    /// ```text
    ///   left; exit short; right; exit short; ICONST long; GOTO join
    ///   short: ICONST !long
    ///   join:
    /// ```
    fn compile_short_circuit(
        &mut self,
        exit: Opcode,
        left: &Expr,
        right: &Expr,
        ctx: &MethodContext,
        code: &mut CodeBuffer,
    ) -> Result<(), GenerationError> {
        let (full, short) = if exit == Opcode::Ifeq {
            (Opcode::Iconst1, Opcode::Iconst0)
        } else {
            (Opcode::Iconst0, Opcode::Iconst1)
        };
        let short_circuit = code.new_label();
        let join = code.new_label();

        self.compile_expr(left, ctx, code)?;
        code.emit_jump(exit, short_circuit)?;
        self.compile_expr(right, ctx, code)?;
        code.emit_jump(exit, short_circuit)?;
        code.emit(full)?;
        code.emit_jump(Opcode::Goto, join)?;
        code.mark(short_circuit)?;
        code.emit(short)?;
        code.mark(join)
    }

    /// Turns a conditional jump into a 0/1 value: 1 exactly when `when_true`
    /// would be taken. The emitted jump is its negation, to the false arm.
    fn emit_boolean(&mut self, when_true: Opcode, code: &mut CodeBuffer) -> Result<(), GenerationError> {
        debug_assert!(when_true.is_conditional_jump(), "{} is not a conditional jump", when_true);
        let when_false = when_true.negate().unwrap_or(Opcode::Ifeq);
        let is_false = code.new_label();
        let join = code.new_label();
        code.emit_jump(when_false, is_false)?;
        code.emit(Opcode::Iconst1)?;
        code.emit_jump(Opcode::Goto, join)?;
        code.mark(is_false)?;
        code.emit(Opcode::Iconst0)?;
        code.mark(join)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Emits a call and returns whether it left a value on the stack.
    #[allow(clippy::too_many_arguments)]
    fn compile_call(
        &mut self,
        receiver: Option<&Expr>,
        name: &str,
        args: &[Expr],
        span: Span,
        needs_value: bool,
        ctx: &MethodContext,
        code: &mut CodeBuffer,
    ) -> Result<bool, GenerationError> {
        let (target, implicit_receiver) = self.resolve_call(receiver.is_some(), name, args.len(), span, ctx)?;
        if needs_value && !target.returns_value {
            return Err(GenerationError::VoidValue {
                name: name.to_string(),
                span,
            });
        }

        match receiver {
            Some(receiver) => self.compile_expr(receiver, ctx, code)?,
            None if implicit_receiver => code.emit_u8(Opcode::Load, 0)?,
            None => {}
        }
        for arg in args {
            self.compile_expr(arg, ctx, code)?;
        }

        let method_ref = self.pool.method_ref(&target.owner, &target.name, &target.descriptor)?;
        let (opcode, receivers) = match target.kind {
            MethodKind::Static => (Opcode::Invokestatic, 0),
            MethodKind::Virtual => (Opcode::Invokevirtual, 1),
        };
        let pops = u16::try_from(args.len() + receivers).unwrap_or(u16::MAX);
        code.emit_invoke(opcode, method_ref, pops, target.returns_value)?;
        Ok(target.returns_value)
    }

    /// Binds a call site. The flag says whether the receiver is the implicit
    /// `this` of the current method.
    ///
    /// Explicit receivers bind to any class's method of that name and arity.
    /// Unqualified calls try the enclosing class, then module functions, then
    /// the fallback handler.
    fn resolve_call(
        &self,
        has_receiver: bool,
        name: &str,
        arity: usize,
        span: Span,
        ctx: &MethodContext,
    ) -> Result<(MethodTarget, bool), GenerationError> {
        let unresolved = || GenerationError::UnresolvedCall {
            name: name.to_string(),
            arity,
            span,
        };

        if has_receiver {
            return self
                .symbols
                .any_method(name, arity)
                .map(|target| (target.clone(), false))
                .ok_or_else(unresolved);
        }
        if let Some(target) = ctx.class.and_then(|class| class.method(name, arity)) {
            return Ok((target.clone(), true));
        }
        if let Some(target) = self.symbols.function(name, arity) {
            return Ok((target.clone(), false));
        }
        self.symbols
            .fallback(name, arity)
            .map(|target| (target, false))
            .ok_or_else(unresolved)
    }

    fn field_ref(&mut self, ctx: &MethodContext, name: &str) -> Result<u16, GenerationError> {
        let owner = ctx.class.map_or(ctx.owner, |class| class.name.as_str());
        self.pool.field_ref(owner, name, FIELD_DESCRIPTOR)
    }
}

fn emit_ldc(index: u16, code: &mut CodeBuffer) -> Result<(), GenerationError> {
    match u8::try_from(index) {
        Ok(index) => code.emit_u8(Opcode::Ldc, index),
        Err(_) => code.emit_u16(Opcode::LdcW, index),
    }
}

fn slot_operand(slot: usize) -> Result<u8, GenerationError> {
    u8::try_from(slot).map_err(|_| GenerationError::TooManyLocals { count: slot + 1 })
}

// =============================================================================
// Module assembly
// =============================================================================

/// A method whose generation failed; it is left out of the module.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionFailure {
    /// `function`, `Class.method` or `<main>`.
    pub function: String,
    pub error: GenerationError,
}

#[derive(Debug)]
pub struct ModuleOutput {
    pub module: CompiledModule,
    pub failures: Vec<FunctionFailure>,
}

/// Compiles a (transformed) unit. A failing method is recorded and skipped;
/// the error only escapes when the module class itself cannot be
/// registered.
pub fn compile_unit(
    unit: &CompilationUnit,
    config: &CompilerConfig,
    cache: &mut DescriptorCache,
) -> Result<ModuleOutput, GenerationError> {
    let mut symbols = SymbolTable::build(unit, &config.module_name, cache);
    if config.builtins {
        symbols = symbols.with_fallback(Box::new(BuiltinFallback));
    }

    let mut pool = ConstantPool::new();
    let this_class = pool.class_ref(&config.module_name)?;
    let mut failures = Vec::new();

    let mut module_class = CompiledClass {
        name: config.module_name.clone(),
        class_ref: this_class,
        fields: Vec::new(),
        methods: Vec::new(),
    };

    for function in last_definitions(unit.functions(), |f| (f.name.clone(), f.arity())) {
        let ctx = MethodContext {
            name: &function.name,
            owner: &config.module_name,
            class: None,
            slots: function_slots(function, None),
            returns_value: returns_value(function),
        };
        let descriptor = descriptor_of(&symbols.function(&function.name, function.arity()).cloned(), function);
        let result = assemble_method(&mut pool, &symbols, &ctx, &descriptor, ACC_STATIC, |generator| {
            generator.generate(&function.body, function.falls_through, &ctx)
        });
        match result {
            Ok(method) => module_class.methods.push(method),
            Err(error) => failures.push(FunctionFailure {
                function: function.name.clone(),
                error,
            }),
        }
    }

    if unit.has_main() {
        let slots = match &unit.main_slots {
            Some(slots) => Cow::Borrowed(slots),
            None => Cow::Owned(allocate_main(&unit.statements)),
        };
        let ctx = MethodContext {
            name: MAIN_METHOD,
            owner: &config.module_name,
            class: None,
            slots,
            returns_value: false,
        };
        let descriptor = method_descriptor(0, false);
        let result = assemble_method(&mut pool, &symbols, &ctx, &descriptor, ACC_STATIC, |generator| {
            generator.generate(unit.main_statements(), unit.main_falls_through, &ctx)
        });
        match result {
            Ok(method) => module_class.methods.push(method),
            Err(error) => failures.push(FunctionFailure {
                function: MAIN_METHOD.to_string(),
                error,
            }),
        }
    }

    let mut classes = vec![module_class];
    for class in last_definitions(unit.classes(), |c| c.name.clone()) {
        let Some(info) = symbols.class(&class.name) else {
            continue;
        };
        match assemble_class(&mut pool, &symbols, class, info, &mut failures) {
            Ok(compiled) => classes.push(compiled),
            Err(error) => failures.push(FunctionFailure {
                function: class.name.clone(),
                error,
            }),
        }
    }

    tracing::debug!(
        classes = classes.len(),
        methods = classes.iter().map(|c| c.methods.len()).sum::<usize>(),
        failures = failures.len(),
        pool = pool.len(),
        "code generation done"
    );

    Ok(ModuleOutput {
        module: CompiledModule {
            major_version: config.version_major,
            minor_version: config.version_minor,
            pool,
            this_class,
            classes,
        },
        failures,
    })
}

fn assemble_class(
    pool: &mut ConstantPool,
    symbols: &SymbolTable,
    class: &ClassDef,
    info: &ClassInfo,
    failures: &mut Vec<FunctionFailure>,
) -> Result<CompiledClass, GenerationError> {
    let class_ref = pool.class_ref(&class.name)?;
    let mut fields = Vec::with_capacity(info.fields.len());
    for name in &info.fields {
        fields.push(CompiledField {
            name: name.clone(),
            name_index: pool.utf8(name)?,
            descriptor_index: pool.utf8(FIELD_DESCRIPTOR)?,
        });
    }

    let mut compiled = CompiledClass {
        name: class.name.clone(),
        class_ref,
        fields,
        methods: Vec::new(),
    };
    let qualified = |method: &str| format!("{}.{}", class.name, method);

    let init_ctx = MethodContext {
        name: INIT_METHOD,
        owner: &class.name,
        class: Some(info),
        slots: Cow::Owned(SlotTable::new(true)),
        returns_value: false,
    };
    let init = assemble_method(pool, symbols, &init_ctx, &method_descriptor(0, false), 0, |generator| {
        generator.generate_initializer(class, &init_ctx)
    });
    match init {
        Ok(method) => compiled.methods.push(method),
        Err(error) => failures.push(FunctionFailure {
            function: qualified(INIT_METHOD),
            error,
        }),
    }

    let field_names: HashSet<String> = info.fields.iter().cloned().collect();
    for method in last_definitions(class.methods(), |m| (m.name.clone(), m.arity())) {
        let ctx = MethodContext {
            name: &method.name,
            owner: &class.name,
            class: Some(info),
            slots: function_slots(method, Some(&field_names)),
            returns_value: returns_value(method),
        };
        let descriptor = descriptor_of(&info.method(&method.name, method.arity()).cloned(), method);
        let result = assemble_method(pool, symbols, &ctx, &descriptor, 0, |generator| {
            generator.generate(&method.body, method.falls_through, &ctx)
        });
        match result {
            Ok(done) => compiled.methods.push(done),
            Err(error) => failures.push(FunctionFailure {
                function: qualified(&method.name),
                error,
            }),
        }
    }

    Ok(compiled)
}

fn assemble_method(
    pool: &mut ConstantPool,
    symbols: &SymbolTable,
    ctx: &MethodContext,
    descriptor: &str,
    flags: u16,
    generate: impl FnOnce(&mut CodeGenerator) -> Result<MethodCode, GenerationError>,
) -> Result<CompiledMethod, GenerationError> {
    let name_index = pool.utf8(ctx.name)?;
    let descriptor_index = pool.utf8(descriptor)?;
    let method = generate(&mut CodeGenerator::new(pool, symbols))?;

    tracing::trace!(
        owner = ctx.owner,
        method = ctx.name,
        bytes = method.code.len(),
        max_stack = method.max_stack,
        max_locals = method.max_locals,
        "method generated"
    );

    Ok(CompiledMethod {
        name: ctx.name.to_string(),
        descriptor: descriptor.to_string(),
        name_index,
        descriptor_index,
        flags,
        max_stack: method.max_stack,
        max_locals: method.max_locals,
        code: method.code,
    })
}

fn function_slots<'f>(function: &'f FunctionDef, fields: Option<&HashSet<String>>) -> Cow<'f, SlotTable> {
    match &function.slots {
        Some(slots) => Cow::Borrowed(slots),
        None => Cow::Owned(allocate_function(function, fields)),
    }
}

fn descriptor_of(target: &Option<MethodTarget>, function: &FunctionDef) -> String {
    match target {
        Some(target) => target.descriptor.clone(),
        None => method_descriptor(function.arity(), returns_value(function)),
    }
}

/// `return` without a value. Value-returning methods hand back 0 so that
/// every exit agrees with the descriptor.
fn emit_bare_return(ctx: &MethodContext, code: &mut CodeBuffer) -> Result<(), GenerationError> {
    if ctx.returns_value {
        code.emit(Opcode::Iconst0)?;
        code.emit(Opcode::Vreturn)
    } else {
        code.emit(Opcode::Return)
    }
}

/// Keeps the last definition for each key, in the order the survivors
/// appear.
fn last_definitions<'u, T, K: PartialEq>(items: impl Iterator<Item = &'u T>, key: impl Fn(&T) -> K) -> Vec<&'u T>
where
    T: 'u,
{
    let mut kept: Vec<&T> = Vec::new();
    for item in items {
        let k = key(item);
        kept.retain(|existing| key(*existing) != k);
        kept.push(item);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::decode;
    use crate::bytecode::pool::PoolEntry;
    use crate::parser::Parser;
    use crate::passes::run_passes;

    fn compile_with(source: &str, config: &CompilerConfig) -> ModuleOutput {
        let (unit, errors) = Parser::new(source).parse();
        assert!(errors.is_empty(), "{:?}", errors);
        let unit = run_passes(unit, config);
        compile_unit(&unit, config, &mut DescriptorCache::new()).expect("module class registers")
    }

    fn compile(source: &str) -> ModuleOutput {
        compile_with(source, &CompilerConfig::default())
    }

    fn opcodes(method: &CompiledMethod) -> Vec<Opcode> {
        decode(&method.code)
            .expect("generated code decodes")
            .into_iter()
            .map(|instruction| instruction.opcode)
            .collect()
    }

    fn main_method(output: &ModuleOutput) -> &CompiledMethod {
        output.module.method("Main", MAIN_METHOD).expect("main present")
    }

    #[test]
    fn test_add_function() {
        let output = compile("def add(a, b) { return a + b }");
        assert!(output.failures.is_empty());
        let add = output.module.method("Main", "add").expect("add");
        assert_eq!(add.code, vec![0x15, 0x00, 0x15, 0x01, 0x60, 0xb0]);
        assert_eq!(add.descriptor, "(AA)A");
        assert_eq!(add.max_locals, 2);
        assert_eq!(add.max_stack, 2);
        assert!(add.is_static());
    }

    #[test]
    fn test_integer_encodings() {
        let output = compile("print(5)\nprint(-1)\nprint(1000)\nprint(100000)");
        let code = &main_method(&output).code;
        let instructions = decode(code).unwrap();
        let pushes: Vec<_> = instructions
            .iter()
            .filter(|i| i.opcode != Opcode::Invokestatic && i.opcode != Opcode::Return)
            .collect();
        assert_eq!(pushes[0].opcode, Opcode::Iconst5);
        assert_eq!(pushes[1].opcode, Opcode::Bipush);
        assert_eq!(pushes[1].immediate(), -1);
        assert_eq!(pushes[2].opcode, Opcode::Sipush);
        assert_eq!(pushes[2].immediate(), 1000);
        assert_eq!(pushes[3].opcode, Opcode::Ldc);
        assert_eq!(
            output.module.pool.get(pushes[3].operand),
            Some(&PoolEntry::Integer(100000))
        );
    }

    #[test]
    fn test_string_constants_share_one_entry() {
        let output = compile("print(\"abc\")\nprint(\"abc\")");
        let pool = &output.module.pool;
        let strings: Vec<u16> = pool
            .iter()
            .filter(|(_, entry)| matches!(entry, PoolEntry::String { .. }))
            .map(|(index, _)| index)
            .collect();
        assert_eq!(strings.len(), 1);
        let utf8_abc = pool.entries().iter().filter(|e| **e == PoolEntry::Utf8("abc".to_string()));
        assert_eq!(utf8_abc.count(), 1);

        let loads: Vec<_> = decode(&main_method(&output).code)
            .unwrap()
            .into_iter()
            .filter(|i| i.opcode == Opcode::Ldc)
            .map(|i| i.operand)
            .collect();
        assert_eq!(loads, vec![strings[0], strings[0]]);
    }

    #[test]
    fn test_comparison_shape() {
        let output = compile("def less(a, b) { return a < b }");
        let less = output.module.method("Main", "less").unwrap();
        assert_eq!(
            opcodes(less),
            vec![
                Opcode::Load,
                Opcode::Load,
                Opcode::IfIcmpge,
                Opcode::Iconst1,
                Opcode::Goto,
                Opcode::Iconst0,
                Opcode::Vreturn
            ]
        );
        let instructions = decode(&less.code).unwrap();
        // IF_ICMPGE skips to ICONST_0, GOTO skips to VRETURN
        assert_eq!(instructions[2].target(), Some(instructions[5].address));
        assert_eq!(instructions[4].target(), Some(instructions[6].address));
    }

    #[test]
    fn test_if_else_and_while() {
        let output = compile(
            "def count(n) {\n i = 0\n while (i < n) { i = i + 1 }\n if (i == 0) { return 1 } else { return i }\n}",
        );
        let count = output.module.method("Main", "count").unwrap();
        let instructions = decode(&count.code).unwrap();
        let ops: Vec<Opcode> = instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(
            ops,
            vec![
                // i = 0
                Opcode::Iconst0,
                Opcode::Store,
                // start: i < n
                Opcode::Load,
                Opcode::Load,
                Opcode::IfIcmpge,
                Opcode::Iconst1,
                Opcode::Goto,
                Opcode::Iconst0,
                Opcode::Ifeq,
                // i = i + 1
                Opcode::Load,
                Opcode::Iconst1,
                Opcode::Iadd,
                Opcode::Store,
                Opcode::Goto,
                // end: if (i == 0)
                Opcode::Load,
                Opcode::Iconst0,
                Opcode::IfIcmpne,
                Opcode::Iconst1,
                Opcode::Goto,
                Opcode::Iconst0,
                Opcode::Ifeq,
                Opcode::Iconst1,
                Opcode::Vreturn,
                Opcode::Load,
                Opcode::Vreturn,
            ]
        );
        // loop back-edge returns to the condition
        assert_eq!(instructions[13].target(), Some(instructions[2].address));
        // loop exit lands on the if
        assert_eq!(instructions[8].target(), Some(instructions[14].address));
        assert_eq!(count.max_locals, 2);
    }

    #[test]
    fn test_short_circuit_and() {
        let output = compile("def both(a, b) { return a && b }");
        let both = output.module.method("Main", "both").unwrap();
        assert_eq!(
            opcodes(both),
            vec![
                Opcode::Load,
                Opcode::Ifeq,
                Opcode::Load,
                Opcode::Ifeq,
                Opcode::Iconst1,
                Opcode::Goto,
                Opcode::Iconst0,
                Opcode::Vreturn
            ]
        );
    }

    #[test]
    fn test_fields_and_methods() {
        let source = "\
class Counter {
    n = 10
    def bump(k) {
        n = n + k
        return show(n = 0)
    }
    def show(v) { return v }
}";
        let output = compile(source);
        assert!(output.failures.is_empty(), "{:?}", output.failures);
        let counter = output.module.class("Counter").expect("class");
        assert_eq!(counter.fields.len(), 1);

        let init = counter.method(INIT_METHOD).expect("init");
        assert_eq!(
            opcodes(init),
            vec![Opcode::Load, Opcode::Bipush, Opcode::Putfield, Opcode::Return]
        );
        assert!(!init.is_static());

        let bump = counter.method("bump").expect("bump");
        assert_eq!(
            opcodes(bump),
            vec![
                // n = n + k
                Opcode::Load,
                Opcode::Load,
                Opcode::Getfield,
                Opcode::Load,
                Opcode::Iadd,
                Opcode::Putfield,
                // return this.show(n = 0)
                Opcode::Load,
                Opcode::Load,
                Opcode::Iconst0,
                Opcode::DupX1,
                Opcode::Putfield,
                Opcode::Invokevirtual,
                Opcode::Vreturn,
            ]
        );
        assert_eq!(bump.max_locals, 2);
        assert_eq!(bump.max_stack, 4);

        let invoke = decode(&bump.code).unwrap()[11];
        assert_eq!(output.module.pool.member(invoke.operand), Some(("Counter", "show", "(A)A")));
    }

    #[test]
    fn test_receiver_call_and_builtin() {
        let output = compile("def poke(c) { c.show(1) }\nclass P { def show(v) { print(v) } }");
        assert!(output.failures.is_empty(), "{:?}", output.failures);
        let poke = output.module.method("Main", "poke").unwrap();
        assert_eq!(
            opcodes(poke),
            vec![Opcode::Load, Opcode::Iconst1, Opcode::Invokevirtual, Opcode::Return]
        );
        let show = output.module.method("P", "show").unwrap();
        let invoke = decode(&show.code).unwrap()[1];
        assert_eq!(invoke.opcode, Opcode::Invokestatic);
        assert_eq!(
            output.module.pool.member(invoke.operand),
            Some(("kiln/Builtins", "print", "(A)V"))
        );
    }

    #[test]
    fn test_failing_function_is_omitted() {
        let output = compile("def bad() { return missing }\ndef good() { return 1 }");
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].function, "bad");
        assert!(matches!(
            output.failures[0].error,
            GenerationError::UndefinedVariable { ref name, .. } if name == "missing"
        ));
        assert!(output.module.method("Main", "bad").is_none());
        assert!(output.module.method("Main", "good").is_some());
    }

    #[test]
    fn test_generation_errors() {
        let cases = [
            ("def f() { return g() }\ndef g() { }", "f"),
            ("def f() { return nothing(1) }", "f"),
            ("def f() { def g() { } }", "f"),
            ("def f() { return 1.5 }", "f"),
        ];
        let errors: Vec<GenerationError> = cases
            .iter()
            .map(|(source, function)| {
                let output = compile(source);
                let failure = output
                    .failures
                    .iter()
                    .find(|f| f.function == *function)
                    .expect("function fails");
                failure.error.clone()
            })
            .collect();
        assert!(matches!(errors[0], GenerationError::VoidValue { .. }));
        assert!(matches!(errors[1], GenerationError::UnresolvedCall { arity: 1, .. }));
        assert!(matches!(errors[2], GenerationError::Unsupported { .. }));
        assert!(matches!(errors[3], GenerationError::Unsupported { .. }));
    }

    #[test]
    fn test_builtins_can_be_disabled() {
        let config = CompilerConfig {
            builtins: false,
            ..CompilerConfig::default()
        };
        let output = compile_with("print(1)", &config);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].function, MAIN_METHOD);
    }

    #[test]
    fn test_main_only_when_top_level_statements() {
        let output = compile("def f() { }");
        assert!(output.module.method("Main", MAIN_METHOD).is_none());
        let f = output.module.method("Main", "f").unwrap();
        assert_eq!(opcodes(f), vec![Opcode::Return]);

        let output = compile("x = 1\nprint(x)");
        let main = main_method(&output);
        assert_eq!(
            opcodes(main),
            vec![Opcode::Iconst1, Opcode::Store, Opcode::Load, Opcode::Invokestatic, Opcode::Return]
        );
        assert_eq!(main.max_locals, 1);
    }

    #[test]
    fn test_generator_allocates_slots_when_pass_disabled() {
        let config = CompilerConfig {
            annotate_slots: false,
            ..CompilerConfig::default()
        };
        let output = compile_with("def f(a) { b = a\n return b }", &config);
        let f = output.module.method("Main", "f").unwrap();
        assert_eq!(f.max_locals, 2);
        assert_eq!(f.code, vec![0x15, 0x00, 0x36, 0x01, 0x15, 0x01, 0xb0]);
    }

    #[test]
    fn test_redefinition_keeps_last() {
        let output = compile("def f() { return 1 }\ndef f() { return 2 }");
        let module_class = output.module.module_class().unwrap();
        let fs: Vec<_> = module_class.methods.iter().filter(|m| m.name == "f").collect();
        assert_eq!(fs.len(), 1);
        assert_eq!(opcodes(fs[0]), vec![Opcode::Iconst2, Opcode::Vreturn]);
    }

    #[test]
    fn test_for_loop() {
        let output = compile("def sum(n) {\n s = 0\n for (i = 0; i < n; i = i + 1) { s = s + i }\n return s\n}");
        assert!(output.failures.is_empty(), "{:?}", output.failures);
        let sum = output.module.method("Main", "sum").unwrap();
        let ops = opcodes(sum);
        assert_eq!(ops.iter().filter(|op| **op == Opcode::Goto).count(), 2);
        assert_eq!(ops.last(), Some(&Opcode::Vreturn));
        assert_eq!(sum.max_locals, 3);
    }

    #[test]
    fn test_value_method_never_ends_in_void_return() {
        let output = compile("def f(c) {
 if (c) { return 1 }
}
def g(c) {
 if (c) { return }
 return 2
}
x = f(0)
print(x)");
        assert!(output.failures.is_empty(), "{:?}", output.failures);

        let f = output.module.method("Main", "f").unwrap();
        assert_eq!(f.descriptor, "(A)A");
        assert_eq!(
            opcodes(f),
            vec![Opcode::Load, Opcode::Ifeq, Opcode::Iconst1, Opcode::Vreturn, Opcode::Iconst0, Opcode::Vreturn]
        );

        let g = output.module.method("Main", "g").unwrap();
        assert_eq!(
            opcodes(g),
            vec![Opcode::Load, Opcode::Ifeq, Opcode::Iconst0, Opcode::Vreturn, Opcode::Iconst2, Opcode::Vreturn]
        );

        for method in [f, g, main_method(&output)] {
            assert!(crate::bytecode::stack_check::check_method(method, &output.module.pool).is_ok());
        }
    }
}
